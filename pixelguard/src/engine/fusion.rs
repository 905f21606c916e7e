// pixelguard/src/engine/fusion.rs
//
// Score aggregation: worker signals → one 0–100 score, level and flags.
//
// Raw score is the plain sum of every suspicious signal. Gating then decides
// how much of it to believe, strictly in this order (first match wins):
//
//   1. no geometric evidence and geometry required  → × no_geometry_multiplier
//   2. fewer than min_signals_required signals      → × few_signals_multiplier
//   3. ≥ combined_min_signals with geometry         → × combined_multiplier
//
// Rhythm alone is weak evidence: a fast, steady human flood-filling an area
// looks metronomic too. A perfect shape drawn at a perfect cadence is not.
//
// After gating, a confident human assessment subtracts
// human_like_penalty × (1 + confidence/100), once. Actors that stay
// suspicious across consecutive analyses earn a capped streak bonus.

use serde_json::json;

use crate::config::Config;
use crate::events::{DetectionDetails, DetectionLevel, DetectionResult, SignalKind};
use crate::state::window::ActorState;
use crate::workers::WorkerOutput;

#[derive(Debug, Clone)]
pub struct Fused {
    pub result:              DetectionResult,
    /// Previous current_score, before this analysis replaced it.
    pub previous_score:      f64,
    /// Score moved enough to be worth a persistence attempt.
    pub persist:             bool,
    /// The human penalty alone pulled the score under low_threshold.
    pub suppressed_by_human: bool,
}

/// Fuse worker output into a result and fold it into the actor's rolling state.
pub fn fuse(out: &WorkerOutput, state: &mut ActorState, cfg: &Config) -> Fused {
    let sc = &cfg.scoring;

    let suspicious: Vec<_> = out.signals.iter().filter(|s| s.suspicious).collect();
    let signal_count = suspicious.len();
    let geometric_evidence = suspicious.iter().any(|s| s.kind == SignalKind::Geometric);
    let raw: f64 = suspicious.iter().map(|s| s.score).sum();
    let mut flags: Vec<String> = suspicious.iter().flat_map(|s| s.flags.clone()).collect();
    let mut gating = Vec::new();

    // ── Gating ────────────────────────────────────────────────────────────────
    let mut score = raw;
    if !geometric_evidence && sc.geometric_required {
        score *= sc.no_geometry_multiplier;
        gating.push("NO_GEOMETRY".to_string());
    } else if signal_count < sc.min_signals_required {
        score *= sc.few_signals_multiplier;
        gating.push("FEW_SIGNALS".to_string());
    } else if signal_count >= sc.combined_min_signals && geometric_evidence {
        score *= sc.combined_multiplier;
        gating.push("COMBINED".to_string());
    }

    // ── Human counter-evidence ────────────────────────────────────────────────
    let mut suppressed_by_human = false;
    if let Some(h) = out.human.as_ref().filter(|h| h.is_human) {
        let before = score;
        score -= sc.human_like_penalty * (1.0 + h.confidence / 100.0);
        gating.push(format!("HUMAN_LIKE:{:.0}", h.confidence));
        suppressed_by_human = before >= sc.low_threshold && score < sc.low_threshold;
    }

    // ── Streak ────────────────────────────────────────────────────────────────
    if state.suspicious_streak > sc.streak_min && signal_count >= sc.min_signals_required {
        let bonus = (state.suspicious_streak as f64 * sc.streak_bonus_per_step).min(sc.streak_bonus_cap);
        score += bonus;
        gating.push(format!("STREAK:{}", state.suspicious_streak));
    }

    let score = score.clamp(0.0, 100.0);
    let level = DetectionLevel::from_score(score, sc);
    flags.extend(gating.iter().cloned());

    // ── Rolling state ─────────────────────────────────────────────────────────
    let previous_score = state.current_score;
    state.current_score = score;
    state.peak_score = state.peak_score.max(score);
    state.analysis_count += 1;
    state.human_indicator_count = out.human.as_ref().map(|h| h.indicators.len() as u32).unwrap_or(0);
    if score >= sc.low_threshold {
        state.suspicious_streak += 1;
        state.detection_flags = flags.clone();
    } else {
        state.suspicious_streak = 0;
    }

    let persist = score >= sc.low_threshold
        && (score > previous_score || (score - previous_score).abs() >= sc.persist_min_delta);

    let result = DetectionResult {
        score,
        level,
        should_record: cfg.recording.enabled && score >= cfg.recording.min_score,
        flags,
        cached: false,
        details: Some(DetectionDetails {
            signals: out.signals.clone(),
            human: out.human.clone(),
            gating,
            raw_score: raw,
            signal_count,
            geometric_evidence,
            event_count: state.events.len(),
        }),
    };
    state.last_result = Some(result.clone());

    Fused { result, previous_score, persist, suppressed_by_human }
}

/// Detail blob stored with a persisted detection.
pub fn detail_blob(result: &DetectionResult, state: &ActorState) -> serde_json::Value {
    json!({
        "flags":          result.flags,
        "details":        result.details,
        "peakScore":      state.peak_score,
        "analysisCount":  state.analysis_count,
        "streak":         state.suspicious_streak,
        "sessionStartMs": state.session_start,
        "recentEvents":   state.recent(20),
    })
}
