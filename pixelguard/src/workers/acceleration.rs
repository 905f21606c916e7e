// pixelguard/src/workers/acceleration.rs
//
// Acceleration: change between consecutive intervals.
//
// People speed up and slow down constantly; a loop with a fixed sleep does
// not. We look at |interval[i+1] − interval[i]| and flag the actor when the
// large majority of those changes are within a couple of milliseconds.

use serde_json::json;

use crate::config::TimingConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{intervals, mean, round2, tail};

pub fn analyze(events: &[PixelEvent], cfg: &TimingConfig) -> Option<Signal> {
    let ivs = intervals(tail(events, cfg.window_size), cfg.max_interval_ms);
    let deltas: Vec<f64> = ivs.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let n = deltas.len();
    if n < cfg.acceleration_min_samples { return None; }

    let steady = deltas.iter().filter(|&&d| d <= cfg.acceleration_tolerance_ms).count();
    let ratio = steady as f64 / n as f64;

    let mut signal = Signal::new(SignalKind::Acceleration);
    if ratio >= cfg.constant_rhythm_ratio {
        signal.add(cfg.acceleration_score, format!("CONSTANT_RHYTHM:{:.0}%", ratio * 100.0));
    }

    Some(signal
        .with_meta("n", json!(n))
        .with_meta("steady_ratio", json!(round2(ratio)))
        .with_meta("mean_abs_change_ms", json!(round2(mean(&deltas)))))
}
