// pixelguard/src/workers/stats.rs
//
// Small numeric helpers shared by the workers. Everything works on plain
// slices of f64; inputs are at most a few hundred samples.

use std::collections::HashMap;
use std::hash::Hash;

use crate::events::PixelEvent;

/// The last `n` items of a chronological slice.
pub fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// Consecutive placement gaps in ms, dropping non-positive and absurd gaps.
pub fn intervals(events: &[PixelEvent], max_interval_ms: f64) -> Vec<f64> {
    events
        .windows(2)
        .map(|w| (w[1].timestamp_ms - w[0].timestamp_ms) as f64)
        .filter(|&d| d > 0.0 && d <= max_interval_ms)
        .collect()
}

pub fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() { return 0.0; }
    vals.iter().sum::<f64>() / vals.len() as f64
}

/// Population variance.
pub fn variance(vals: &[f64]) -> f64 {
    if vals.is_empty() { return 0.0; }
    let m = mean(vals);
    vals.iter().map(|x| (x - m).powi(2)).sum::<f64>() / vals.len() as f64
}

/// Linear-interpolated percentile of already sorted values, `p` in [0,1].
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

pub fn sorted(vals: &[f64]) -> Vec<f64> {
    let mut s = vals.to_vec();
    s.sort_by(|a, b| a.total_cmp(b));
    s
}

/// Symmetric trim: drop `ratio` of samples from each end of the sorted data.
pub fn trimmed(vals: &[f64], ratio: f64) -> Vec<f64> {
    let s = sorted(vals);
    let cut = (s.len() as f64 * ratio).floor() as usize;
    if s.len() <= cut * 2 { return s; }
    s[cut..s.len() - cut].to_vec()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub n:        usize,
    pub mean:     f64,
    pub variance: f64,
    pub std:      f64,
    /// std / mean × 100
    pub cv:       f64,
    pub median:   f64,
    pub iqr:      f64,
}

impl Summary {
    pub fn of(vals: &[f64]) -> Self {
        let s = sorted(vals);
        let mean = mean(&s);
        let variance = variance(&s);
        let std = variance.sqrt();
        Self {
            n:      s.len(),
            mean,
            variance,
            std,
            cv:     if mean > 0.0 { std / mean * 100.0 } else { 0.0 },
            median: percentile_sorted(&s, 0.5),
            iqr:    percentile_sorted(&s, 0.75) - percentile_sorted(&s, 0.25),
        }
    }
}

/// Shannon entropy of a frequency distribution (bits).
pub fn shannon_entropy<K: Eq + Hash>(counts: &HashMap<K, usize>) -> f64 {
    let total: f64 = counts.values().sum::<usize>() as f64;
    if total == 0.0 {
        return 0.0;
    }
    counts
        .values()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_constant_series() {
        let s = Summary::of(&[50.0; 30]);
        assert_eq!(s.n, 30);
        assert_eq!(s.mean, 50.0);
        assert_eq!(s.variance, 0.0);
        assert_eq!(s.cv, 0.0);
        assert_eq!(s.iqr, 0.0);
        assert_eq!(s.median, 50.0);
    }

    #[test]
    fn percentiles_interpolate() {
        let s = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile_sorted(&s, 0.5) - 2.5).abs() < 1e-9);
        assert!((percentile_sorted(&s, 0.25) - 1.75).abs() < 1e-9);
        assert_eq!(percentile_sorted(&[], 0.5), 0.0);
    }

    #[test]
    fn trim_drops_each_decile() {
        let vals: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        let t = trimmed(&vals, 0.10);
        assert_eq!(t.len(), 16);
        assert_eq!(t[0], 3.0);
        assert_eq!(t[15], 18.0);
    }

    #[test]
    fn entropy_bits() {
        let mut uniform = HashMap::new();
        for k in 0..4u8 { uniform.insert(k, 5usize); }
        assert!((shannon_entropy(&uniform) - 2.0).abs() < 1e-9);

        let mut single = HashMap::new();
        single.insert(1u8, 9usize);
        assert_eq!(shannon_entropy(&single), 0.0);
    }

    #[test]
    fn intervals_skip_bad_gaps() {
        let ev = |t| PixelEvent { x: 0, y: 0, color: None, timestamp_ms: t, canvas_id: 0 };
        let events = [ev(0), ev(100), ev(100), ev(90_000), ev(90_050)];
        assert_eq!(intervals(&events, 60_000.0), vec![100.0, 50.0]);
    }
}
