pub mod acceleration;
pub mod burst;
pub mod color;
pub mod entropy;
pub mod geometric;
pub mod human;
pub mod spatial;
pub mod stats;
pub mod timing;

use crate::config::Config;
use crate::events::{HumanAssessment, PixelEvent, Signal};

/// Everything the aggregator needs from one analysis pass.
#[derive(Debug, Clone, Default)]
pub struct WorkerOutput {
    pub signals:          Vec<Signal>,
    pub human:            Option<HumanAssessment>,
    /// Sum of the suspicious rhythm signals (timing + entropy + acceleration + burst).
    pub preliminary:      f64,
    pub geometric_ran:    bool,
}

/// Run every worker over the actor's buffered events (oldest first).
/// Workers returning None (not enough data) are silently dropped.
///
/// The cheap rhythm workers always run; the shape detectors only run when the
/// rhythm already scores above `geometric.preliminary_floor`.
pub fn run_all(events: &[PixelEvent], cfg: &Config) -> WorkerOutput {
    let rhythm: Vec<Signal> = [
        timing::analyze(events, &cfg.timing),
        entropy::analyze(events, &cfg.timing),
        acceleration::analyze(events, &cfg.timing),
        burst::analyze(events, &cfg.timing),
    ]
    .into_iter()
    .flatten()
    .collect();

    let preliminary: f64 = rhythm.iter()
        .filter(|s| s.suspicious && s.kind.is_rhythm())
        .map(|s| s.score)
        .sum();

    let mut signals = rhythm;
    let geometric_ran = preliminary > cfg.geometric.preliminary_floor;
    if geometric_ran {
        signals.push(geometric::analyze(events, &cfg.geometric));
    }
    signals.extend(spatial::analyze(events, &cfg.geometric));
    signals.extend(color::analyze(events, &cfg.color));

    WorkerOutput {
        signals,
        human: human::assess(events, &cfg.human_behavior, cfg.timing.max_interval_ms),
        preliminary,
        geometric_ran,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SignalKind;

    fn line(n: i64, gap: i64) -> Vec<PixelEvent> {
        (0..n)
            .map(|i| PixelEvent { x: 100 + i as i32, y: 50, color: Some(7), timestamp_ms: 1_000 + i * gap, canvas_id: 0 })
            .collect()
    }

    #[test]
    fn metronome_line_runs_shape_detectors() {
        let out = run_all(&line(60, 50), &Config::default());
        assert!(out.geometric_ran);
        assert!(out.preliminary > 10.0);
        assert!(out.signals.iter().any(|s| s.kind == SignalKind::Geometric && s.suspicious));
    }

    #[test]
    fn slow_irregular_actor_skips_shape_detectors() {
        let gaps = [900, 2_400, 610, 3_300, 1_250, 770, 4_100, 1_900, 530, 2_800, 1_400, 980];
        let mut t = 0;
        let events: Vec<PixelEvent> = gaps.iter().enumerate()
            .map(|(i, g)| {
                t += g;
                PixelEvent { x: (i as i32 * 13) % 40, y: (i as i32 * 7) % 30, color: Some(i as u8), timestamp_ms: t, canvas_id: 0 }
            })
            .collect();
        let out = run_all(&events, &Config::default());
        assert!(!out.geometric_ran);
        assert!(out.signals.iter().all(|s| s.kind != SignalKind::Geometric));
    }
}
