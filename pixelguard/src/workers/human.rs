// pixelguard/src/workers/human.rs
//
// Human-likelihood heuristic: counter-evidence, scored independently.
//
// Each indicator is something scripts rarely bother to fake and people can't
// help doing. Indicators carry fixed weights; at human_threshold the actor is
// treated as human and the aggregator subtracts a penalty scaled by how sure
// we are.
//
//   natural variance: raw interval variance well above a floor
//   pauses:           a few percent of gaps are multi-second breaks
//   human CV:         coefficient of variation in the range hands produce
//   wide IQR:         middle half of intervals spans > 200 ms
//   reversals:        the cursor often doubles back

use crate::config::HumanBehaviorConfig;
use crate::events::{HumanAssessment, PixelEvent};
use crate::workers::stats::{intervals, Summary};

/// Share of consecutive moves whose direction flips (negative dot product).
pub fn reversal_ratio(events: &[PixelEvent]) -> f64 {
    let moves: Vec<(i64, i64)> = events
        .windows(2)
        .map(|w| ((w[1].x - w[0].x) as i64, (w[1].y - w[0].y) as i64))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
        .collect();
    if moves.len() < 2 { return 0.0; }
    let flips = moves.windows(2)
        .filter(|m| m[0].0 * m[1].0 + m[0].1 * m[1].1 < 0)
        .count();
    flips as f64 / (moves.len() - 1) as f64
}

/// `max_interval_ms` is the timing section's cutoff, so both views of an
/// actor's rhythm drop the same idle gaps.
pub fn assess(events: &[PixelEvent], cfg: &HumanBehaviorConfig, max_interval_ms: f64) -> Option<HumanAssessment> {
    let ivs = intervals(events, max_interval_ms);
    if ivs.len() < cfg.min_samples { return None; }

    let s = Summary::of(&ivs);
    let pauses = ivs.iter().filter(|&&iv| iv >= cfg.pause_threshold_ms).count();
    let pause_ratio = pauses as f64 / ivs.len() as f64;
    let reversals = reversal_ratio(events);

    let mut score = 0.0;
    let mut indicators = Vec::new();
    let mut hit = |weight: f64, name: String| {
        score += weight;
        indicators.push(name);
    };

    if s.variance > cfg.natural_variance_floor {
        hit(cfg.natural_variance_weight, format!("natural_variance:{:.0}", s.variance));
    }
    if pause_ratio >= cfg.pause_min_ratio {
        hit(cfg.pause_weight, format!("natural_pauses:{:.0}%", pause_ratio * 100.0));
    }
    if s.cv >= cfg.cv_min && s.cv <= cfg.cv_max {
        hit(cfg.cv_weight, format!("human_cv:{:.0}%", s.cv));
    }
    if s.iqr > cfg.iqr_min_ms {
        hit(cfg.iqr_weight, format!("wide_iqr:{:.0}ms", s.iqr));
    }
    if reversals > cfg.reversal_min_ratio {
        hit(cfg.reversal_weight, format!("direction_reversals:{:.0}%", reversals * 100.0));
    }

    Some(HumanAssessment {
        is_human:    score >= cfg.human_threshold,
        human_score: score,
        confidence:  score.min(100.0),
        indicators,
    })
}
