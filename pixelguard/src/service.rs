// pixelguard/src/service.rs
//
// PixelGuard: the one object the placement pipeline talks to.
//
// Owns both detectors, the shared persistence gate and recorder, the live
// config and the engine counters. Nothing here is global: a process that
// wants two independent engines (tests do) builds two services.
//
// Background work is limited to the periodic cleanup sweep, started with
// spawn_sweeper and stopped by shutdown(). The sweep runs on event time: the
// newest placement timestamp seen, advanced by the wall time since it arrived.
// Live traffic keeps it at the wall clock; a replayed log keeps its own.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigHandle, ConfigPatch};
use crate::engine::detector::BotDetector;
use crate::engine::gate::PersistenceGate;
use crate::error::Result;
use crate::events::{ActorKey, DetectionId, DetectionResult, DetectionStatus, PixelPlacement};
use crate::recorder::Recorder;
use crate::scripted_line::{ScriptedLineDetector, ScriptedLineResult};
use crate::sink::DetectionSink;
use crate::state::window::{ActorSnapshot, SweepReport};
use crate::stats::{EngineStats, StatsSnapshot};

/// Both detectors' answers for one placement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlacementVerdict {
    pub detection:     DetectionResult,
    pub scripted_line: ScriptedLineResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub actors:         SweepReport,
    pub gate_pruned:    usize,
    pub traces_evicted: usize,
}

/// High-water mark of placement time, paired with when it was observed.
#[derive(Debug, Default)]
struct EventClock {
    latest: Mutex<Option<(i64, i64)>>,
}

impl EventClock {
    fn observe(&self, event_ms: i64, wall_ms: i64) {
        let mut latest = self.latest.lock();
        match *latest {
            Some((seen, _)) if seen > event_ms => {}
            _ => *latest = Some((event_ms, wall_ms)),
        }
    }

    fn now(&self, wall_ms: i64) -> i64 {
        match *self.latest.lock() {
            Some((event_ms, seen_at)) => event_ms + (wall_ms - seen_at).max(0),
            None => wall_ms,
        }
    }
}

struct Sweeper {
    stop:   watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct PixelGuard {
    config:   ConfigHandle,
    sink:     Arc<dyn DetectionSink>,
    stats:    Arc<EngineStats>,
    recorder: Arc<Recorder>,
    gate:     Arc<PersistenceGate>,
    detector: BotDetector,
    scripted: ScriptedLineDetector,
    clock:    EventClock,
    sweeper:  Mutex<Option<Sweeper>>,
}

impl PixelGuard {
    pub fn new(config: Config, sink: Arc<dyn DetectionSink>) -> Arc<Self> {
        let config   = ConfigHandle::new(config);
        let stats    = Arc::new(EngineStats::new());
        let recorder = Recorder::new(Arc::clone(&sink), config.clone());
        let gate     = Arc::new(PersistenceGate::new(Arc::clone(&sink), Arc::clone(&recorder), Arc::clone(&stats)));
        Arc::new(Self {
            detector: BotDetector::new(config.clone(), Arc::clone(&gate), Arc::clone(&stats)),
            scripted: ScriptedLineDetector::new(config.clone(), Arc::clone(&gate), Arc::clone(&stats)),
            config,
            sink,
            stats,
            recorder,
            gate,
            clock:   EventClock::default(),
            sweeper: Mutex::new(None),
        })
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    pub fn record_pixel(&self, placement: &PixelPlacement) -> PlacementVerdict {
        let now_ms = placement.timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.record_pixel_at(placement, now_ms)
    }

    pub fn record_pixel_at(&self, placement: &PixelPlacement, now_ms: i64) -> PlacementVerdict {
        self.clock.observe(now_ms, Utc::now().timestamp_millis());
        PlacementVerdict {
            detection:     self.detector.record_pixel_at(placement, now_ms),
            scripted_line: self.scripted.record_pixel_at(placement, now_ms),
        }
    }

    /// Feed a frame to the actor's evidence recording, if one is running.
    pub fn add_recording_frame(&self, actor: &ActorKey, frame: Value) -> bool {
        self.recorder.add_frame(actor, frame)
    }

    // ── Operator surface ──────────────────────────────────────────────────────

    pub fn config(&self) -> Arc<Config> {
        self.config.current()
    }

    pub fn update_config(&self, patch: &ConfigPatch) -> Arc<Config> {
        let next = self.config.update(patch);
        info!("config updated");
        next
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.detector.active_users(), self.recorder.active_count())
    }

    pub fn user_analysis(&self, actor: &ActorKey) -> Option<ActorSnapshot> {
        self.detector.user_analysis(actor)
    }

    /// Moderator verdict: set the record status and drop its evidence.
    pub async fn resolve_detection(&self, id: DetectionId, status: DetectionStatus, evidence: Option<&Path>) -> Result<()> {
        self.sink.set_status(id, status).await?;
        self.recorder.cleanup(id, evidence).await?;
        info!("detection {} resolved as {:?}", id, status);
        Ok(())
    }

    pub fn recorder(&self) -> &Arc<Recorder> { &self.recorder }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    /// Current time on the placement clock, used by the periodic sweep.
    pub fn event_clock_ms(&self) -> i64 {
        self.clock.now(Utc::now().timestamp_millis())
    }

    pub fn sweep(&self, now_ms: i64) -> CleanupReport {
        let cfg = self.config.current();
        let report = CleanupReport {
            actors:         self.detector.sweep(now_ms),
            gate_pruned:    self.gate.prune(now_ms, cfg.limits.db_write_cooldown_ms),
            traces_evicted: self.scripted.sweep(now_ms),
        };
        debug!(
            idle = report.actors.idle_evicted,
            lru = report.actors.lru_evicted,
            actors = report.actors.remaining,
            gate = report.gate_pruned,
            traces = report.traces_evicted,
            "cleanup sweep"
        );
        report
    }

    /// Start the periodic sweep. A second call while one is running is a no-op.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() { return; }

        let (stop, mut stopped) = watch::channel(false);
        let period = Duration::from_millis(self.config.current().limits.cleanup_interval_ms.max(1));
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(svc) = weak.upgrade() else { break };
                        svc.sweep(svc.event_clock_ms());
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() { break; }
                    }
                }
            }
            debug!("cleanup sweeper stopped");
        });
        *slot = Some(Sweeper { stop, handle });
    }

    /// Stop the sweeper and flush every active recording.
    pub async fn shutdown(&self) -> Vec<PathBuf> {
        let sweeper = self.sweeper.lock().take();
        if let Some(s) = sweeper {
            let _ = s.stop.send(true);
            if let Err(e) = s.handle.await {
                warn!("sweeper task ended abnormally: {}", e);
            }
        }
        let paths = self.recorder.stop_all().await;
        info!("shutdown complete, {} recording(s) flushed", paths.len());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsPatch, RecordingPatch};
    use crate::events::{DetectionLevel, DetectionType};
    use crate::sink::MemorySink;
    use serde_json::json;

    fn service(dir: &Path) -> (Arc<MemorySink>, Arc<PixelGuard>) {
        let config = Config::default().apply(&ConfigPatch {
            recording: Some(RecordingPatch { output_dir: Some(dir.to_path_buf()), ..Default::default() }),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::new());
        (sink.clone(), PixelGuard::new(config, sink))
    }

    fn pixel(user: u64, x: f64, y: f64) -> PixelPlacement {
        PixelPlacement {
            user_id: Some(user), ip: "203.0.113.50".into(), canvas_id: 2, x, y,
            color: Some(11), device_id: None, timestamp_ms: None,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() { return; }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn bot_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, svc) = service(dir.path());
        let actor = ActorKey::User(77);

        // adjacent horizontal run at a 50 ms cadence, one color
        for i in 0..60 {
            let v = svc.record_pixel_at(&pixel(77, 500.0 + i as f64, 20.0), 5_000 + i * 50);
            svc.add_recording_frame(&actor, json!({"x": 500 + i, "y": 20, "color": 11}));
            if i == 59 {
                assert_eq!(v.detection.level, DetectionLevel::High);
                assert!(!v.scripted_line.detected);
            }
            tokio::task::yield_now().await;
        }
        wait_for(|| sink.create_count() >= 1).await;
        assert!(svc.recorder().is_recording(&actor));

        // then a dotted row, 3 px apart: the scripted-line detector's turn
        let mut scripted = Vec::new();
        for k in 0..10 {
            let v = svc.record_pixel_at(&pixel(77, 500.0 + 3.0 * k as f64, 40.0), 8_000 + k * 100);
            svc.add_recording_frame(&actor, json!({"x": 500 + 3 * k, "y": 40, "color": 11}));
            scripted.push(v.scripted_line.detected);
            tokio::task::yield_now().await;
        }
        assert_eq!(scripted.iter().filter(|d| **d).count(), 1);
        assert!(scripted[9]);

        // the line lands inside the actor's write cooldown: reported, not stored again
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.create_count(), 1);
        let records = sink.all();
        assert_eq!(records[0].detection_type, DetectionType::BotPattern);

        let stats = svc.stats();
        assert_eq!(stats.total_pixels_processed, 70);
        assert_eq!(stats.total_detections, 1);
        assert_eq!(stats.scripted_lines_detected, 1);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.active_recordings, 1);

        let flushed = svc.shutdown().await;
        assert_eq!(flushed.len(), 1);
        let file: Value = serde_json::from_slice(&std::fs::read(&flushed[0]).unwrap()).unwrap();
        assert!(file["metadata"]["frameCount"].as_u64().unwrap() > 0);

        let recorded = records.iter()
            .find_map(|r| sink.get(r.id).filter(|r| r.video_path.is_some()))
            .unwrap();
        svc.resolve_detection(recorded.id, DetectionStatus::Banned, recorded.video_path.as_deref()).await.unwrap();
        let after = sink.get(recorded.id).unwrap();
        assert_eq!(after.status, DetectionStatus::Banned);
        assert!(after.video_path.is_none());
        assert!(!flushed[0].exists());
    }

    #[test]
    fn config_patch_keeps_unspecified_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (_, svc) = service(dir.path());
        let next = svc.update_config(&ConfigPatch {
            limits: Some(LimitsPatch { max_users_tracked: Some(5), ..Default::default() }),
            ..Default::default()
        });
        assert_eq!(next.limits.max_users_tracked, 5);
        assert_eq!(next.limits.max_pixels_per_user, 200);
        assert_eq!(svc.config().recording.output_dir, dir.path());
    }

    #[test]
    fn sweep_clears_idle_state() {
        let dir = tempfile::tempdir().unwrap();
        let (_, svc) = service(dir.path());
        svc.record_pixel_at(&pixel(1, 0.0, 0.0), 0);
        svc.record_pixel_at(&pixel(2, 0.0, 0.0), 200_000);

        let report = svc.sweep(400_000);
        assert_eq!(report.actors.idle_evicted, 1);
        assert_eq!(report.actors.remaining, 1);
        assert_eq!(report.traces_evicted, 2);
        assert!(svc.user_analysis(&ActorKey::User(1)).is_none());
        assert!(svc.user_analysis(&ActorKey::User(2)).is_some());
    }

    #[test]
    fn replayed_history_survives_the_event_clock_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (_, svc) = service(dir.path());
        let day_ago = Utc::now().timestamp_millis() - 86_400_000;
        for i in 0..20 {
            svc.record_pixel_at(&pixel(3, i as f64 * 7.0, 0.0), day_ago + i * 400);
        }

        let clock = svc.event_clock_ms();
        assert!(clock >= day_ago + 19 * 400 && clock < day_ago + 3_600_000);
        let report = svc.sweep(clock);
        assert_eq!(report.actors.idle_evicted, 0);
        assert_eq!(svc.user_analysis(&ActorKey::User(3)).unwrap().event_count, 20);
    }

    #[test]
    fn event_clock_follows_the_newest_placement() {
        let clock = EventClock::default();
        assert_eq!(clock.now(5_000), 5_000);
        clock.observe(1_000, 10_000);
        assert_eq!(clock.now(12_500), 3_500);
        // older events never move it back
        clock.observe(900, 11_000);
        assert_eq!(clock.now(12_500), 3_500);
        clock.observe(4_000, 12_000);
        assert_eq!(clock.now(12_000), 4_000);
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (_, svc) = service(dir.path());
        svc.spawn_sweeper();
        svc.spawn_sweeper();
        assert!(svc.shutdown().await.is_empty());
        assert!(svc.sweeper.lock().is_none());
    }
}
