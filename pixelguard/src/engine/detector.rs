// pixelguard/src/engine/detector.rs
//
// Probabilistic bot detector: the per-placement hot path.
//
//   validate → ingest into the actor's ring → throttle → workers → fusion
//   → (maybe) persistence gate
//
// record_pixel never fails and never blocks on I/O: bad input and a full actor
// table both yield a neutral result, throttled actors get their cached result
// back, and persistence runs on a spawned task.
//
// Lock order: the actor map shard is only touched to fetch the slot; the
// actor's own mutex is released before the gate (another map) is entered.

use std::sync::Arc;

use chrono::Utc;

use crate::config::ConfigHandle;
use crate::engine::fusion;
use crate::engine::gate::{Candidate, PersistenceGate};
use crate::engine::throttle::{self, ThrottleDecision, TokenBucket};
use crate::events::{ActorKey, DetectionResult, DetectionType, NewDetection, PixelEvent, PixelPlacement};
use crate::state::window::{ActorSnapshot, ActorStore, SweepReport};
use crate::stats::EngineStats;
use crate::workers;

pub struct BotDetector {
    config: ConfigHandle,
    store:  ActorStore,
    bucket: TokenBucket,
    gate:   Arc<PersistenceGate>,
    stats:  Arc<EngineStats>,
}

impl BotDetector {
    pub fn new(config: ConfigHandle, gate: Arc<PersistenceGate>, stats: Arc<EngineStats>) -> Self {
        let bucket = TokenBucket::new(config.current().limits.max_analyses_per_second);
        Self { config, store: ActorStore::new(), bucket, gate, stats }
    }

    /// Score one placement, stamped with its own timestamp or the wall clock.
    pub fn record_pixel(&self, placement: &PixelPlacement) -> DetectionResult {
        let now_ms = placement.timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.record_pixel_at(placement, now_ms)
    }

    pub fn record_pixel_at(&self, placement: &PixelPlacement, now_ms: i64) -> DetectionResult {
        EngineStats::bump(&self.stats.pixels_processed);
        let cfg = self.config.current();

        let Some(valid) = placement.validate() else { return DetectionResult::neutral() };
        let Some(slot) = self.store.slot(&valid.actor, now_ms, &cfg.limits) else {
            return DetectionResult::neutral();
        };

        let mut st = slot.lock();
        st.ingest(&valid, now_ms, &cfg.limits);
        if st.events.len() < cfg.timing.min_sequence_size {
            return DetectionResult::neutral();
        }

        let decision = throttle::check(
            &self.bucket, st.last_analysis_at, st.current_score, now_ms, &cfg.limits, &cfg.scoring,
        );
        if let Some(reason) = decision.flag() {
            match decision {
                ThrottleDecision::Throttled   => EngineStats::bump(&self.stats.dropped_throttle),
                ThrottleDecision::RateLimited => EngineStats::bump(&self.stats.dropped_rate_limit),
                ThrottleDecision::Analyze     => {}
            }
            return st.last_result.as_ref().unwrap_or(&DetectionResult::neutral()).reused(reason);
        }

        st.last_analysis_at = Some(now_ms);
        EngineStats::bump(&self.stats.analyses_run);

        let events: Vec<PixelEvent> = st.events.iter().copied().collect();
        let out = workers::run_all(&events, &cfg);
        let fused = fusion::fuse(&out, &mut st, &cfg);
        if fused.suppressed_by_human {
            EngineStats::bump(&self.stats.false_positives_avoided);
        }

        let candidate = fused.persist.then(|| Candidate {
            detection: NewDetection {
                actor:          st.actor.clone(),
                anon_id:        st.anon_id.clone(),
                canvas_id:      st.canvas_id,
                x:              valid.x,
                y:              valid.y,
                score:          fused.result.score,
                level:          fused.result.level,
                detection_type: DetectionType::BotPattern,
                details:        fusion::detail_blob(&fused.result, &st),
            },
            should_record: fused.result.should_record,
        });
        drop(st);

        if let Some(c) = candidate {
            self.gate.submit(c, now_ms, cfg.limits.db_write_cooldown_ms);
        }
        fused.result
    }

    pub fn user_analysis(&self, actor: &ActorKey) -> Option<ActorSnapshot> {
        self.store.snapshot(actor)
    }

    pub fn active_users(&self) -> usize { self.store.len() }

    pub fn sweep(&self, now_ms: i64) -> SweepReport {
        let cfg = self.config.current();
        self.store.sweep(now_ms, &cfg.limits)
    }
}
