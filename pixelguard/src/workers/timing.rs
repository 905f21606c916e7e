// pixelguard/src/workers/timing.rs
//
// Timing worker: inter-placement interval regularity.
//
// A person placing pixels by hand produces jittery intervals: reaction time,
// aiming, the odd pause to pick a color. A script driven by a timer produces
// intervals whose variance collapses toward zero no matter how slow it runs.
//
// Statistics are computed over a 10% symmetric trim so a single lag spike on
// the client connection cannot hide an otherwise perfect cadence. Suspicion
// rises as variance falls and as the sample grows; tiers stack except the
// variance tiers, where only the tightest matching one applies.

use serde_json::json;

use crate::config::TimingConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{intervals, round2, tail, trimmed, Summary};

pub fn analyze(events: &[PixelEvent], cfg: &TimingConfig) -> Option<Signal> {
    let window = tail(events, cfg.window_size);
    let ivs = intervals(window, cfg.max_interval_ms);
    let n = ivs.len();
    if n < 2 { return None; }

    let s = Summary::of(&trimmed(&ivs, cfg.trim_ratio));
    let mut signal = Signal::new(SignalKind::Timing);

    // ── Variance tiers ────────────────────────────────────────────────────────
    if s.variance <= cfg.variance_very_low && n >= cfg.very_low_min_samples {
        signal.add(cfg.base_score * 2.0, format!("TIMING_VARIANCE_VERY_LOW:{:.1}", s.variance));
    } else if s.variance <= cfg.variance_low && n >= cfg.low_min_samples {
        signal.add(cfg.base_score * 1.5, format!("TIMING_VARIANCE_LOW:{:.1}", s.variance));
    } else if s.variance <= cfg.variance_moderate && n >= cfg.moderate_min_samples {
        signal.add(cfg.base_score, format!("TIMING_VARIANCE_MODERATE:{:.1}", s.variance));
    }

    // ── Shape of the distribution ─────────────────────────────────────────────
    if s.mean < cfg.fast_interval_ms && n >= cfg.fast_min_samples {
        signal.add(cfg.fast_interval_score, format!("FAST_INTERVAL:{:.0}ms", s.mean));
    }
    if s.cv < cfg.low_cv_percent && n >= cfg.low_cv_min_samples {
        signal.add(cfg.low_cv_score, format!("LOW_CV:{:.1}%", s.cv));
    }
    if s.iqr < cfg.narrow_iqr_ms && n >= cfg.narrow_iqr_min_samples {
        signal.add(cfg.narrow_iqr_score, format!("NARROW_IQR:{:.0}ms", s.iqr));
    }
    if (s.median - s.mean).abs() < cfg.median_mean_gap_ms && n >= cfg.median_mean_min_samples {
        signal.add(cfg.median_mean_score, "SYMMETRIC_INTERVALS");
    }

    Some(signal
        .with_meta("n", json!(n))
        .with_meta("mean_ms", json!(round2(s.mean)))
        .with_meta("variance", json!(round2(s.variance)))
        .with_meta("std_ms", json!(round2(s.std)))
        .with_meta("cv_percent", json!(round2(s.cv)))
        .with_meta("median_ms", json!(round2(s.median)))
        .with_meta("iqr_ms", json!(round2(s.iqr))))
}
