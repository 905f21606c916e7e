// pixelguard/src/engine/gate.rs
//
// Detection persistence gate: the only path from a score to a stored record.
//
// Per-actor cooldown of db_write_cooldown_ms, shared by every detection type:
//   inside:  never write; only remember the new candidate if it scores higher
//   outside: reserve the slot synchronously (so a burst of placements can't
//            race several writes through), then spawn the write:
//            1. pending record (any type) with ≥ score? skip
//            2. create the record with the full detail blob
//            3. on success, start evidence recording when asked to
//
// Sink failures are logged and dropped; there is no retry queue. The next
// qualifying score after the cooldown simply tries again.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{ActorKey, DetectionLevel, DetectionRecord, NewDetection};
use crate::recorder::Recorder;
use crate::sink::DetectionSink;
use crate::stats::EngineStats;

/// Something worth persisting, produced by one of the detectors.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub detection:     NewDetection,
    pub should_record: bool,
}

impl Candidate {
    pub fn score(&self) -> f64 { self.detection.score }
    pub fn level(&self) -> DetectionLevel { self.detection.level }
}

#[derive(Debug, Clone)]
struct GateEntry {
    last_write_ms: i64,
    latest:        Candidate,
}

pub struct PersistenceGate {
    entries:  DashMap<ActorKey, GateEntry>,
    sink:     Arc<dyn DetectionSink>,
    recorder: Arc<Recorder>,
    stats:    Arc<EngineStats>,
}

impl PersistenceGate {
    pub fn new(sink: Arc<dyn DetectionSink>, recorder: Arc<Recorder>, stats: Arc<EngineStats>) -> Self {
        Self { entries: DashMap::new(), sink, recorder, stats }
    }

    /// Offer a candidate. Returns the spawned write when one was started;
    /// `None` means the actor is inside its cooldown (or there is no runtime).
    pub fn submit(&self, candidate: Candidate, now_ms: i64, cooldown_ms: i64) -> Option<JoinHandle<Option<DetectionRecord>>> {
        match self.entries.entry(candidate.detection.actor.clone()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                if now_ms - entry.last_write_ms < cooldown_ms {
                    if candidate.score() > entry.latest.score() {
                        entry.latest = candidate;
                    }
                    return None;
                }
                entry.last_write_ms = now_ms;
                entry.latest = candidate.clone();
            }
            Entry::Vacant(v) => {
                v.insert(GateEntry { last_write_ms: now_ms, latest: candidate.clone() });
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("no tokio runtime, detection for {} not persisted", candidate.detection.actor);
                return None;
            }
        };

        let sink     = Arc::clone(&self.sink);
        let recorder = Arc::clone(&self.recorder);
        let stats    = Arc::clone(&self.stats);
        Some(runtime.spawn(write_detection(candidate, sink, recorder, stats)))
    }

    /// Highest-scoring candidate seen for this actor in the current window.
    pub fn latest_score(&self, actor: &ActorKey) -> Option<f64> {
        self.entries.get(actor).map(|e| e.latest.score())
    }

    /// Drop entries whose cooldown has elapsed.
    pub fn prune(&self, now_ms: i64, cooldown_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now_ms - e.last_write_ms < cooldown_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

async fn write_detection(
    candidate: Candidate,
    sink:      Arc<dyn DetectionSink>,
    recorder:  Arc<Recorder>,
    stats:     Arc<EngineStats>,
) -> Option<DetectionRecord> {
    let Candidate { detection, should_record } = candidate;
    let actor = detection.actor.clone();

    match sink.pending_detection_for(&actor).await {
        Ok(Some(existing)) if existing.score >= detection.score => {
            debug!("pending detection {} for {} already scores {:.1}, skipping", existing.id, actor, existing.score);
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            warn!("pending lookup failed for {}: {}", actor, e);
            return None;
        }
    }

    let (canvas_id, center) = (detection.canvas_id, (detection.x, detection.y));
    let record = match sink.create_detection(detection).await {
        Ok(r) => r,
        Err(e) => {
            warn!("detection create failed for {}: {}", actor, e);
            return None;
        }
    };
    EngineStats::bump(&stats.detections);

    if should_record {
        recorder.start(record.id, actor, canvas_id, center, None);
    }
    Some(record)
}
