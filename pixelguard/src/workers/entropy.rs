// pixelguard/src/workers/entropy.rs
//
// Interval entropy: how many distinct "rhythms" an actor uses.
//
// Intervals are bucketed (entropy_bucket_ms wide) and the Shannon entropy of
// the bucket histogram is measured. A timer loop lands almost every interval
// in one or two buckets; hand placement smears across many.

use std::collections::HashMap;

use serde_json::json;

use crate::config::TimingConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{intervals, round2, shannon_entropy, tail};

pub fn analyze(events: &[PixelEvent], cfg: &TimingConfig) -> Option<Signal> {
    let ivs = intervals(tail(events, cfg.window_size), cfg.max_interval_ms);
    let n = ivs.len();
    if n < cfg.entropy_min_samples { return None; }

    let bucket_ms = cfg.entropy_bucket_ms.max(1.0);
    let mut hist: HashMap<i64, usize> = HashMap::new();
    for iv in &ivs {
        *hist.entry((iv / bucket_ms).floor() as i64).or_insert(0) += 1;
    }
    let bits = shannon_entropy(&hist);

    let mut signal = Signal::new(SignalKind::IntervalEntropy);
    if bits < cfg.low_entropy_bits {
        signal.add(cfg.entropy_score, format!("LOW_INTERVAL_ENTROPY:{:.2}bits", bits));
    }

    Some(signal
        .with_meta("n", json!(n))
        .with_meta("entropy_bits", json!(round2(bits)))
        .with_meta("distinct_buckets", json!(hist.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &[i64]) -> Vec<PixelEvent> {
        ts.iter()
            .map(|&t| PixelEvent { x: 0, y: 0, color: None, timestamp_ms: t, canvas_id: 0 })
            .collect()
    }

    #[test]
    fn fixed_cadence_has_no_entropy() {
        let ts: Vec<i64> = (0..30).map(|i| i * 120).collect();
        let sig = analyze(&at(&ts), &TimingConfig::default()).unwrap();
        assert!(sig.suspicious);
        assert_eq!(sig.meta["distinct_buckets"], json!(1));
    }

    #[test]
    fn varied_cadence_is_clean() {
        let mut t = 0;
        let mut ts = vec![0];
        for i in 0..30 {
            t += 200 + (i * 137) % 900;
            ts.push(t);
        }
        let sig = analyze(&at(&ts), &TimingConfig::default()).unwrap();
        assert!(!sig.suspicious);
    }

    #[test]
    fn needs_enough_samples() {
        let ts: Vec<i64> = (0..10).map(|i| i * 120).collect();
        assert!(analyze(&at(&ts), &TimingConfig::default()).is_none());
    }
}
