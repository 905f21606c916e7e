// pixelguard/src/workers/color.rs
//
// Color worker: palette usage over the last colored placements.
//
//   single color:   one palette index covers ~everything
//   low entropy:    histogram collapses onto one or two colors
//   color sequence: a long uninterrupted run of the same color

use std::collections::HashMap;

use serde_json::json;

use crate::config::ColorConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{round2, shannon_entropy};

pub fn longest_run(colors: &[u8]) -> usize {
    let mut best = 0;
    let mut run = 0;
    let mut prev = None;
    for &c in colors {
        run = if prev == Some(c) { run + 1 } else { 1 };
        prev = Some(c);
        best = best.max(run);
    }
    best
}

pub fn analyze(events: &[PixelEvent], cfg: &ColorConfig) -> Option<Signal> {
    let colored: Vec<u8> = events.iter().filter_map(|e| e.color).collect();
    let colors = &colored[colored.len().saturating_sub(cfg.window_size)..];
    let n = colors.len();
    if n < cfg.min_samples { return None; }

    let mut hist: HashMap<u8, usize> = HashMap::new();
    for &c in colors {
        *hist.entry(c).or_insert(0) += 1;
    }
    let dominant = hist.values().max().copied().unwrap_or(0);
    let dominant_ratio = dominant as f64 / n as f64;
    let bits = shannon_entropy(&hist);
    let run = longest_run(colors);

    let mut signal = Signal::new(SignalKind::Color);
    if dominant_ratio >= cfg.dominant_ratio {
        signal.add(cfg.dominant_score, format!("SINGLE_COLOR:{:.0}%", dominant_ratio * 100.0));
    }
    if bits < cfg.low_entropy_bits {
        signal.add(cfg.low_entropy_score, format!("LOW_COLOR_ENTROPY:{:.2}bits", bits));
    }
    if run >= cfg.sequential_pattern_length {
        signal.add(cfg.sequential_score, format!("COLOR_SEQUENCE:{}", run));
    }

    Some(signal
        .with_meta("n", json!(n))
        .with_meta("distinct_colors", json!(hist.len()))
        .with_meta("dominant_ratio", json!(round2(dominant_ratio)))
        .with_meta("entropy_bits", json!(round2(bits)))
        .with_meta("longest_run", json!(run)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(colors: impl IntoIterator<Item = Option<u8>>) -> Vec<PixelEvent> {
        colors.into_iter().enumerate()
            .map(|(i, color)| PixelEvent { x: i as i32, y: 0, color, timestamp_ms: i as i64, canvas_id: 0 })
            .collect()
    }

    #[test]
    fn single_color_trips_all_three() {
        let sig = analyze(&events(std::iter::repeat(Some(5)).take(50)), &ColorConfig::default()).unwrap();
        assert_eq!(sig.flags.len(), 3);
        assert_eq!(sig.score, 8.0 + 6.0 + 6.0);
    }

    #[test]
    fn palette_cycling_is_clean() {
        let sig = analyze(&events((0..50).map(|i| Some((i % 7) as u8))), &ColorConfig::default()).unwrap();
        assert!(!sig.suspicious);
    }

    #[test]
    fn uncolored_events_are_ignored() {
        let mut colors: Vec<Option<u8>> = vec![None; 40];
        colors.extend(std::iter::repeat(Some(1)).take(10));
        assert!(analyze(&events(colors), &ColorConfig::default()).is_none());
    }

    #[test]
    fn runs() {
        assert_eq!(longest_run(&[1, 1, 2, 2, 2, 1]), 3);
        assert_eq!(longest_run(&[]), 0);
    }
}
