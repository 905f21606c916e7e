// pixelguard/src/config.rs
//
// Detection tuning, one typed section per concern.
//
// Every section comes with a matching *Patch type whose fields are all
// Option<_>. Updating the live config is field-by-field: a patch field that is
// None keeps the previous value, a missing section keeps the whole previous
// section. The same patch type is what a JSON config file deserializes into,
// so a file only needs to name the knobs it changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

macro_rules! config_section {
    (
        $(#[$meta:meta])*
        $name:ident / $patch:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }

        #[doc = concat!("Partial update for [`", stringify!($name), "`].")]
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $patch {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl $name {
            /// New section with every `Some` field of `patch` applied.
            pub fn apply(&self, patch: &$patch) -> Self {
                Self {
                    $( $field: patch.$field.clone().unwrap_or_else(|| self.$field.clone()), )*
                }
            }
        }
    };
}

config_section! {
    /// Inter-placement interval statistics and the rhythm sub-analyzers.
    TimingConfig / TimingPatch {
        /// Most recent events considered.
        window_size: usize = 80,
        /// Buffered events required before any analysis runs.
        min_sequence_size: usize = 10,
        max_interval_ms: f64 = 60_000.0,
        trim_ratio: f64 = 0.10,
        base_score: f64 = 15.0,

        variance_very_low: f64 = 20.0,
        very_low_min_samples: usize = 25,
        variance_low: f64 = 50.0,
        low_min_samples: usize = 18,
        variance_moderate: f64 = 100.0,
        moderate_min_samples: usize = 12,

        fast_interval_ms: f64 = 20.0,
        fast_interval_score: f64 = 12.0,
        fast_min_samples: usize = 15,
        low_cv_percent: f64 = 10.0,
        low_cv_score: f64 = 10.0,
        low_cv_min_samples: usize = 30,
        narrow_iqr_ms: f64 = 50.0,
        narrow_iqr_score: f64 = 8.0,
        narrow_iqr_min_samples: usize = 20,
        median_mean_gap_ms: f64 = 15.0,
        median_mean_score: f64 = 6.0,
        median_mean_min_samples: usize = 25,

        entropy_bucket_ms: f64 = 25.0,
        low_entropy_bits: f64 = 1.0,
        entropy_min_samples: usize = 20,
        entropy_score: f64 = 12.0,

        acceleration_tolerance_ms: f64 = 2.0,
        constant_rhythm_ratio: f64 = 0.8,
        acceleration_min_samples: usize = 20,
        acceleration_score: f64 = 10.0,

        burst_window_ms: i64 = 1_000,
        burst_threshold: usize = 15,
        burst_score: f64 = 12.0,
    }
}

config_section! {
    /// Shape detectors plus the spatial density/overlap checks.
    GeometricConfig / GeometricPatch {
        window_size: usize = 80,
        /// Timing + entropy + burst + acceleration must exceed this before
        /// any shape detector runs.
        preliminary_floor: f64 = 10.0,

        min_line_length: usize = 8,
        perfect_line_threshold: usize = 20,
        max_deviation_pixels: i32 = 0,
        line_score: f64 = 20.0,
        perfect_line_bonus: f64 = 10.0,

        rectangle_min_points: usize = 12,
        rectangle_edge_ratio: f64 = 0.65,
        rectangle_perimeter_coverage: f64 = 0.40,
        rectangle_score: f64 = 18.0,

        grid_min_points: usize = 9,
        grid_spacing_tolerance: i32 = 1,
        grid_min_spacing: i32 = 2,
        grid_score: f64 = 15.0,

        circle_window: usize = 16,
        circle_min_radius: f64 = 4.0,
        circle_max_radius_error: f64 = 1.0,
        circle_score: f64 = 18.0,

        spatial_window: usize = 60,
        cluster_min_density: f64 = 0.5,
        cluster_min_area: i64 = 25,
        cluster_score: f64 = 8.0,
        overlap_ratio: f64 = 0.30,
        overlap_min_points: usize = 30,
        overlap_score: f64 = 8.0,
    }
}

config_section! {
    /// Color histogram checks over recent colored placements.
    ColorConfig / ColorPatch {
        window_size: usize = 50,
        min_samples: usize = 20,
        dominant_ratio: f64 = 0.99,
        dominant_score: f64 = 8.0,
        low_entropy_bits: f64 = 0.5,
        low_entropy_score: f64 = 6.0,
        sequential_pattern_length: usize = 30,
        sequential_score: f64 = 6.0,
    }
}

config_section! {
    /// Aggregation, gating and level thresholds.
    ScoringConfig / ScoringPatch {
        low_threshold: f64 = 30.0,
        medium_threshold: f64 = 50.0,
        high_threshold: f64 = 70.0,
        geometric_required: bool = true,
        min_signals_required: usize = 4,
        no_geometry_multiplier: f64 = 0.3,
        few_signals_multiplier: f64 = 0.4,
        combined_min_signals: usize = 5,
        combined_multiplier: f64 = 1.15,
        human_like_penalty: f64 = 30.0,
        /// Streak bonus applies once the streak is strictly above this.
        streak_min: u32 = 3,
        streak_bonus_per_step: f64 = 2.0,
        streak_bonus_cap: f64 = 10.0,
        /// A non-increasing score still persists when it moved at least this much.
        persist_min_delta: f64 = 8.0,
    }
}

config_section! {
    /// Evidence frame-log capture.
    RecordingConfig / RecordingPatch {
        enabled: bool = true,
        min_score: f64 = 75.0,
        max_duration_ms: u64 = 120_000,
        max_active_recordings: usize = 10,
        max_frames_per_recording: usize = 5_000,
        default_zoom: f64 = 4.0,
        output_dir: PathBuf = PathBuf::from("recordings"),
    }
}

config_section! {
    /// Memory and throughput bounds.
    LimitsConfig / LimitsPatch {
        max_pixels_per_user: usize = 200,
        history_window_ms: i64 = 300_000,
        max_users_tracked: usize = 10_000,
        max_analyses_per_second: f64 = 200.0,
        analysis_throttle_ms: i64 = 1_000,
        db_write_cooldown_ms: i64 = 60_000,
        cleanup_interval_ms: u64 = 60_000,
    }
}

config_section! {
    /// Counter-evidence weights for the human-likelihood heuristic.
    HumanBehaviorConfig / HumanBehaviorPatch {
        min_samples: usize = 10,
        natural_variance_floor: f64 = 1_000.0,
        natural_variance_weight: f64 = 25.0,
        pause_threshold_ms: f64 = 2_000.0,
        pause_min_ratio: f64 = 0.03,
        pause_weight: f64 = 20.0,
        cv_min: f64 = 30.0,
        cv_max: f64 = 150.0,
        cv_weight: f64 = 15.0,
        iqr_min_ms: f64 = 200.0,
        iqr_weight: f64 = 15.0,
        reversal_min_ratio: f64 = 0.30,
        reversal_weight: f64 = 25.0,
        human_threshold: f64 = 50.0,
    }
}

config_section! {
    /// Deterministic scripted-line detector.
    ScriptedLineConfig / ScriptedLinePatch {
        enabled: bool = true,
        max_points: usize = 48,
        max_time_window_ms: i64 = 15_000,
        min_points: usize = 10,
        collinearity_tolerance_px: f64 = 0.75,
        min_spacing_px: f64 = 2.0,
        max_spacing_px: f64 = 40.0,
        spacing_tolerance_rel: f64 = 0.05,
        detection_cooldown_ms: i64 = 30_000,
        idle_timeout_ms: i64 = 60_000,
    }
}

// ── Whole config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing:         TimingConfig,
    pub geometric:      GeometricConfig,
    pub color:          ColorConfig,
    pub scoring:        ScoringConfig,
    pub recording:      RecordingConfig,
    pub limits:         LimitsConfig,
    pub human_behavior: HumanBehaviorConfig,
    pub scripted_line:  ScriptedLineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub timing:         Option<TimingPatch>,
    pub geometric:      Option<GeometricPatch>,
    pub color:          Option<ColorPatch>,
    pub scoring:        Option<ScoringPatch>,
    pub recording:      Option<RecordingPatch>,
    pub limits:         Option<LimitsPatch>,
    pub human_behavior: Option<HumanBehaviorPatch>,
    pub scripted_line:  Option<ScriptedLinePatch>,
}

fn merge<S: Clone, P>(current: &S, patch: Option<&P>, apply: impl Fn(&S, &P) -> S) -> S {
    match patch {
        Some(p) => apply(current, p),
        None    => current.clone(),
    }
}

impl Config {
    pub fn apply(&self, patch: &ConfigPatch) -> Config {
        Config {
            timing:         merge(&self.timing, patch.timing.as_ref(), TimingConfig::apply),
            geometric:      merge(&self.geometric, patch.geometric.as_ref(), GeometricConfig::apply),
            color:          merge(&self.color, patch.color.as_ref(), ColorConfig::apply),
            scoring:        merge(&self.scoring, patch.scoring.as_ref(), ScoringConfig::apply),
            recording:      merge(&self.recording, patch.recording.as_ref(), RecordingConfig::apply),
            limits:         merge(&self.limits, patch.limits.as_ref(), LimitsConfig::apply),
            human_behavior: merge(&self.human_behavior, patch.human_behavior.as_ref(), HumanBehaviorConfig::apply),
            scripted_line:  merge(&self.scripted_line, patch.scripted_line.as_ref(), ScriptedLineConfig::apply),
        }
    }

    /// Load a JSON patch file and apply it over the defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        let patch: ConfigPatch = serde_json::from_str(&raw).map_err(|e| Error::Config {
            path:   path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Config::default().apply(&patch))
    }
}

// ── Shared live handle ────────────────────────────────────────────────────────

/// Live config shared by every component. Readers take a cheap `Arc`
/// snapshot per event; writers swap the whole value.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(config))) }
    }

    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.inner.read())
    }

    pub fn update(&self, patch: &ConfigPatch) -> Arc<Config> {
        let mut guard = self.inner.write();
        let next = Arc::new(guard.apply(patch));
        *guard = Arc::clone(&next);
        next
    }

    pub fn replace(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }
}
