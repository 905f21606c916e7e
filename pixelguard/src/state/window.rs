// pixelguard/src/state/window.rs
//
// Per-actor sliding window state store.
// DashMap = sharded concurrent HashMap; each actor's state sits behind its own
// parking_lot::Mutex so two actors never contend, and the sweep walks the map
// with the same discipline as ingestion.
//
// Design:
//   - Per-actor ring buffer of PixelEvent (fixed capacity, FIFO eviction)
//   - Time-window pruning on every ingest (history_window_ms)
//   - Rolling scores, streaks and the last DetectionResult for throttled reuse
//   - Capacity: a brand-new actor is refused once max_users_tracked is hit;
//     the sweep trims overflow by least-recent activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::LimitsConfig;
use crate::events::{ActorKey, DetectionResult, PixelEvent, ValidPlacement};
use crate::state::ring::RingBuffer;

const SNAPSHOT_EVENTS: usize = 20;

// ── Per-actor state ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ActorState {
    pub actor:                 ActorKey,
    pub events:                RingBuffer<PixelEvent>,
    pub last_activity:         i64,
    pub last_analysis_at:      Option<i64>,
    pub current_score:         f64,
    pub peak_score:            f64,
    pub detection_flags:       Vec<String>,
    pub analysis_count:        u64,
    pub suspicious_streak:     u32,
    pub human_indicator_count: u32,
    pub session_start:         i64,
    pub canvas_id:             u32,
    pub anon_id:               Option<String>,
    pub last_result:           Option<DetectionResult>,
}

impl ActorState {
    pub fn new(actor: ActorKey, now_ms: i64, capacity: usize) -> Self {
        Self {
            actor,
            events:                RingBuffer::with_capacity(capacity),
            last_activity:         now_ms,
            last_analysis_at:      None,
            current_score:         0.0,
            peak_score:            0.0,
            detection_flags:       Vec::new(),
            analysis_count:        0,
            suspicious_streak:     0,
            human_indicator_count: 0,
            session_start:         now_ms,
            canvas_id:             0,
            anon_id:               None,
            last_result:           None,
        }
    }

    pub fn ingest(&mut self, p: &ValidPlacement, now_ms: i64, limits: &LimitsConfig) {
        if self.events.capacity() != limits.max_pixels_per_user.max(1) {
            self.events.resize(limits.max_pixels_per_user);
        }
        self.events.push(PixelEvent {
            x:            p.x,
            y:            p.y,
            color:        p.color,
            timestamp_ms: now_ms,
            canvas_id:    p.canvas_id,
        });
        self.last_activity = now_ms;
        self.canvas_id = p.canvas_id;
        if p.device_id.is_some() {
            self.anon_id = p.device_id.clone();
        }
        self.prune(now_ms, limits.history_window_ms);
    }

    pub fn prune(&mut self, now_ms: i64, window_ms: i64) -> usize {
        self.events.pop_front_while(|e| now_ms - e.timestamp_ms > window_ms)
    }

    pub fn recent(&self, n: usize) -> Vec<PixelEvent> {
        self.events.recent(n)
    }

    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            actor:                 self.actor.clone(),
            event_count:           self.events.len(),
            last_activity:         ms_to_utc(self.last_activity),
            last_analysis_at:      self.last_analysis_at.and_then(ms_to_utc),
            session_start:         ms_to_utc(self.session_start),
            current_score:         self.current_score,
            peak_score:            self.peak_score,
            detection_flags:       self.detection_flags.clone(),
            analysis_count:        self.analysis_count,
            suspicious_streak:     self.suspicious_streak,
            human_indicator_count: self.human_indicator_count,
            canvas_id:             self.canvas_id,
            anon_id:               self.anon_id.clone(),
            recent_events:         self.events.recent(SNAPSHOT_EVENTS),
        }
    }
}

fn ms_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Read-only view for support / investigation tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ActorSnapshot {
    pub actor:                 ActorKey,
    pub event_count:           usize,
    pub last_activity:         Option<DateTime<Utc>>,
    pub last_analysis_at:      Option<DateTime<Utc>>,
    pub session_start:         Option<DateTime<Utc>>,
    pub current_score:         f64,
    pub peak_score:            f64,
    pub detection_flags:       Vec<String>,
    pub analysis_count:        u64,
    pub suspicious_streak:     u32,
    pub human_indicator_count: u32,
    pub canvas_id:             u32,
    pub anon_id:               Option<String>,
    pub recent_events:         Vec<PixelEvent>,
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub idle_evicted: usize,
    pub lru_evicted:  usize,
    pub remaining:    usize,
}

pub type ActorSlot = Arc<Mutex<ActorState>>;

pub struct ActorStore {
    actors:      DashMap<ActorKey, ActorSlot>,
    pub refused: AtomicU64,
}

impl ActorStore {
    pub fn new() -> Self {
        Self {
            actors:  DashMap::new(),
            refused: AtomicU64::new(0),
        }
    }

    /// Existing slot, or a fresh one when there is room for another actor.
    pub fn slot(&self, actor: &ActorKey, now_ms: i64, limits: &LimitsConfig) -> Option<ActorSlot> {
        if let Some(s) = self.actors.get(actor) {
            return Some(Arc::clone(s.value()));
        }
        if self.actors.len() >= limits.max_users_tracked {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let slot = self.actors
            .entry(actor.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ActorState::new(actor.clone(), now_ms, limits.max_pixels_per_user))))
            .clone();
        Some(slot)
    }

    pub fn get(&self, actor: &ActorKey) -> Option<ActorSlot> {
        self.actors.get(actor).map(|s| Arc::clone(s.value()))
    }

    pub fn snapshot(&self, actor: &ActorKey) -> Option<ActorSnapshot> {
        self.get(actor).map(|s| s.lock().snapshot())
    }

    pub fn len(&self) -> usize { self.actors.len() }
    pub fn is_empty(&self) -> bool { self.actors.is_empty() }

    /// Drop idle actors, then trim by least-recent activity down to the cap.
    pub fn sweep(&self, now_ms: i64, limits: &LimitsConfig) -> SweepReport {
        let before = self.actors.len();
        self.actors.retain(|_, slot| now_ms - slot.lock().last_activity <= limits.history_window_ms);
        let idle_evicted = before.saturating_sub(self.actors.len());

        let mut lru_evicted = 0;
        let len = self.actors.len();
        if len > limits.max_users_tracked {
            let mut by_age: Vec<(i64, ActorKey)> = self.actors
                .iter()
                .map(|e| (e.value().lock().last_activity, e.key().clone()))
                .collect();
            by_age.sort();
            for (_, key) in by_age.into_iter().take(len - limits.max_users_tracked) {
                if self.actors.remove(&key).is_some() {
                    lru_evicted += 1;
                }
            }
        }

        let report = SweepReport { idle_evicted, lru_evicted, remaining: self.actors.len() };
        debug!(idle = idle_evicted, lru = lru_evicted, remaining = report.remaining, "actor sweep");
        report
    }
}

impl Default for ActorStore { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(x: i32) -> ValidPlacement {
        ValidPlacement {
            actor: ActorKey::User(1), canvas_id: 3, x, y: 0, color: Some(1),
            device_id: Some("dev-1".into()),
        }
    }

    fn limits() -> LimitsConfig {
        LimitsConfig { max_pixels_per_user: 10, history_window_ms: 1_000, max_users_tracked: 3, ..Default::default() }
    }

    #[test]
    fn ingest_caps_buffer_and_prunes_by_time() {
        let limits = limits();
        let mut st = ActorState::new(ActorKey::User(1), 0, limits.max_pixels_per_user);
        for i in 0..25 {
            st.ingest(&placement(i), i as i64 * 10, &limits);
            assert!(st.events.len() <= 10);
        }
        let xs: Vec<i32> = st.events.iter().map(|e| e.x).collect();
        assert_eq!(xs, (15..25).collect::<Vec<_>>());
        assert_eq!(st.canvas_id, 3);
        assert_eq!(st.anon_id.as_deref(), Some("dev-1"));

        // far in the future: everything but the new event ages out
        st.ingest(&placement(99), 10_000, &limits);
        assert_eq!(st.events.len(), 1);
        assert_eq!(st.last_activity, 10_000);
    }

    #[test]
    fn new_actor_refused_at_capacity() {
        let store = ActorStore::new();
        let limits = limits();
        for id in 0..3 {
            assert!(store.slot(&ActorKey::User(id), 0, &limits).is_some());
        }
        assert!(store.slot(&ActorKey::User(9), 0, &limits).is_none());
        // existing actors are still served
        assert!(store.slot(&ActorKey::User(1), 0, &limits).is_some());
        assert_eq!(store.refused.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sweep_evicts_idle_then_oldest() {
        let store = ActorStore::new();
        let roomy = LimitsConfig { max_users_tracked: 10, ..limits() };
        for (id, seen) in [(1u64, 100i64), (2, 5_000), (3, 5_200), (4, 5_100), (5, 5_300)] {
            let slot = store.slot(&ActorKey::User(id), seen, &roomy).unwrap();
            slot.lock().last_activity = seen;
        }

        let tight = LimitsConfig { max_users_tracked: 2, ..limits() };
        let report = store.sweep(5_500, &tight);
        assert_eq!(report.idle_evicted, 1); // user 1 idle for 5.4s > 1s window
        assert_eq!(report.lru_evicted, 2);  // users 2 and 4 are the oldest left
        assert!(store.get(&ActorKey::User(1)).is_none());
        assert!(store.get(&ActorKey::User(2)).is_none());
        assert!(store.get(&ActorKey::User(4)).is_none());
        assert!(store.get(&ActorKey::User(3)).is_some());
        assert!(store.get(&ActorKey::User(5)).is_some());
    }
}
