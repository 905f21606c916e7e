// pixelguard/src/stats.rs
//
// Engine-wide counters. Plain relaxed atomics; the snapshot is what the
// operator surface and the periodic stats line report.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineStats {
    pub pixels_processed:         AtomicU64,
    pub analyses_run:             AtomicU64,
    pub detections:               AtomicU64,
    pub false_positives_avoided:  AtomicU64,
    pub dropped_rate_limit:       AtomicU64,
    pub dropped_throttle:         AtomicU64,
    pub scripted_lines:           AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self { Self::default() }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_users: usize, active_recordings: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_pixels_processed:  self.pixels_processed.load(Ordering::Relaxed),
            total_analyses_run:      self.analyses_run.load(Ordering::Relaxed),
            total_detections:        self.detections.load(Ordering::Relaxed),
            false_positives_avoided: self.false_positives_avoided.load(Ordering::Relaxed),
            dropped_due_to_rate_limit: self.dropped_rate_limit.load(Ordering::Relaxed),
            dropped_due_to_throttle: self.dropped_throttle.load(Ordering::Relaxed),
            scripted_lines_detected: self.scripted_lines.load(Ordering::Relaxed),
            active_users,
            active_recordings,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_pixels_processed:    u64,
    pub total_analyses_run:        u64,
    pub total_detections:          u64,
    pub false_positives_avoided:   u64,
    pub dropped_due_to_rate_limit: u64,
    pub dropped_due_to_throttle:   u64,
    pub scripted_lines_detected:   u64,
    pub active_users:              usize,
    pub active_recordings:         usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let stats = EngineStats::new();
        EngineStats::bump(&stats.pixels_processed);
        EngineStats::bump(&stats.dropped_throttle);
        let v = serde_json::to_value(stats.snapshot(3, 1)).unwrap();
        assert_eq!(v["totalPixelsProcessed"], 1);
        assert_eq!(v["droppedDueToThrottle"], 1);
        assert_eq!(v["droppedDueToRateLimit"], 0);
        assert_eq!(v["activeUsers"], 3);
        assert_eq!(v["activeRecordings"], 1);
    }
}
