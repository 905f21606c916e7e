// pixelguard/src/workers/burst.rs
//
// Burst: placements inside any sliding burst_window_ms window.
// Two-pointer scan over the (chronological) window, O(n).

use serde_json::json;

use crate::config::TimingConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::tail;

pub fn max_in_window(events: &[PixelEvent], window_ms: i64) -> usize {
    let mut best = 0;
    let mut lo = 0;
    for hi in 0..events.len() {
        while events[hi].timestamp_ms - events[lo].timestamp_ms >= window_ms {
            lo += 1;
        }
        best = best.max(hi - lo + 1);
    }
    best
}

pub fn analyze(events: &[PixelEvent], cfg: &TimingConfig) -> Option<Signal> {
    let window = tail(events, cfg.window_size);
    if window.len() < 2 { return None; }

    let peak = max_in_window(window, cfg.burst_window_ms.max(1));
    let mut signal = Signal::new(SignalKind::Burst);
    if peak >= cfg.burst_threshold {
        signal.add(cfg.burst_score, format!("BURST:{}_in_{}ms", peak, cfg.burst_window_ms));
    }
    Some(signal.with_meta("peak_in_window", json!(peak)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: impl IntoIterator<Item = i64>) -> Vec<PixelEvent> {
        ts.into_iter()
            .map(|t| PixelEvent { x: 0, y: 0, color: None, timestamp_ms: t, canvas_id: 0 })
            .collect()
    }

    #[test]
    fn counts_densest_second() {
        let mut ts: Vec<i64> = (0..5).map(|i| i * 400).collect();
        ts.extend((0..18).map(|i| 3_000 + i * 50));
        let events = at(ts);
        assert_eq!(max_in_window(&events, 1_000), 18);
        assert!(analyze(&events, &TimingConfig::default()).unwrap().suspicious);
    }

    #[test]
    fn relaxed_pace_is_clean() {
        let events = at((0..40).map(|i| i * 400));
        assert_eq!(max_in_window(&events, 1_000), 3);
        assert!(!analyze(&events, &TimingConfig::default()).unwrap().suspicious);
    }
}
