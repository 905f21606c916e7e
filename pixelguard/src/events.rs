// pixelguard/src/events.rs
//
// Shared event types and all domain types flowing through pixelguard.
//
//   PixelPlacement:  what the placement pipeline hands us (untrusted)
//   PixelEvent:      validated, immutable entry in an actor's ring buffer
//   Signal:          one analyzer's verdict
//   DetectionResult: synchronous answer to record_pixel
//   NewDetection / DetectionRecord: the persistence collaborator's view

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;

pub const MAX_COORD: f64 = 1_000_000.0;
pub const MAX_COLOR_INDEX: i64 = 255;

pub type DetectionId = u64;

// ── Actor identity ────────────────────────────────────────────────────────────

/// Logical identity being tracked. An authenticated user id always wins over
/// the connection's IP, so several sockets logged in as one user collapse
/// into one actor while anonymous traffic is tracked per IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ActorKey {
    User(u64),
    Ip(String),
}

impl ActorKey {
    pub fn resolve(user_id: Option<u64>, ip: &str) -> Option<Self> {
        match user_id {
            Some(id) => Some(Self::User(id)),
            None => {
                let ip = ip.trim();
                if ip.is_empty() { None } else { Some(Self::Ip(ip.to_string())) }
            }
        }
    }

    pub fn user_id(&self) -> Option<u64> {
        match self {
            Self::User(id) => Some(*id),
            Self::Ip(_)    => None,
        }
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Ip(ip)   => write!(f, "ip:{}", ip),
        }
    }
}

impl FromStr for ActorKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("user:") {
            return id.parse().map(Self::User).map_err(|e| format!("bad user id {:?}: {}", id, e));
        }
        match s.strip_prefix("ip:") {
            Some(ip) if !ip.is_empty() => Ok(Self::Ip(ip.to_string())),
            _ => Err(format!("unrecognised actor key {:?}", s)),
        }
    }
}

impl From<ActorKey> for String {
    fn from(k: ActorKey) -> Self { k.to_string() }
}

impl TryFrom<String> for ActorKey {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

// ── Inbound placement ─────────────────────────────────────────────────────────

/// One placement as reported by the placement pipeline. Nothing here is
/// trusted; `validate` is the only way to turn it into a `PixelEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelPlacement {
    #[serde(default)]
    pub user_id:      Option<u64>,
    #[serde(default)]
    pub ip:           String,
    pub canvas_id:    u32,
    pub x:            f64,
    pub y:            f64,
    #[serde(default)]
    pub color:        Option<i64>,
    #[serde(default)]
    pub device_id:    Option<String>,
    /// Original placement time; replay tooling sets it, live traffic does not.
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

/// A placement that passed validation.
#[derive(Debug, Clone)]
pub struct ValidPlacement {
    pub actor:     ActorKey,
    pub canvas_id: u32,
    pub x:         i32,
    pub y:         i32,
    pub color:     Option<u8>,
    pub device_id: Option<String>,
}

impl PixelPlacement {
    pub fn actor_key(&self) -> Option<ActorKey> {
        ActorKey::resolve(self.user_id, &self.ip)
    }

    pub fn validate(&self) -> Option<ValidPlacement> {
        let actor = self.actor_key()?;
        if !self.x.is_finite() || !self.y.is_finite() { return None; }
        if self.x.abs() > MAX_COORD || self.y.abs() > MAX_COORD { return None; }
        let color = match self.color {
            None => None,
            Some(c) if (0..=MAX_COLOR_INDEX).contains(&c) => Some(c as u8),
            Some(_) => return None,
        };
        Some(ValidPlacement {
            actor,
            canvas_id: self.canvas_id,
            x:         self.x.round() as i32,
            y:         self.y.round() as i32,
            color,
            device_id: self.device_id.clone().filter(|d| !d.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelEvent {
    pub x:            i32,
    pub y:            i32,
    pub color:        Option<u8>,
    pub timestamp_ms: i64,
    pub canvas_id:    u32,
}

// ── Signals ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Timing,          // interval variance / CV / IQR tiers
    IntervalEntropy, // histogram entropy of intervals
    Acceleration,    // interval-to-interval change
    Burst,           // placements per sliding window
    Geometric,       // lines, rectangles, grids, circles
    Spatial,         // density / overlap
    Color,           // palette usage
}

impl SignalKind {
    /// Signals that feed the cheap preliminary score gating geometry.
    pub fn is_rhythm(self) -> bool {
        matches!(self, Self::Timing | Self::IntervalEntropy | Self::Acceleration | Self::Burst)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timing          => write!(f, "timing"),
            Self::IntervalEntropy => write!(f, "interval_entropy"),
            Self::Acceleration    => write!(f, "acceleration"),
            Self::Burst           => write!(f, "burst"),
            Self::Geometric       => write!(f, "geometric"),
            Self::Spatial         => write!(f, "spatial"),
            Self::Color           => write!(f, "color"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub kind:       SignalKind,
    pub suspicious: bool,
    pub score:      f64,
    pub flags:      Vec<String>,
    pub meta:       BTreeMap<String, serde_json::Value>,
}

impl Signal {
    pub fn new(kind: SignalKind) -> Self {
        Self { kind, suspicious: false, score: 0.0, flags: Vec::new(), meta: BTreeMap::new() }
    }

    pub fn add(&mut self, score: f64, flag: impl Into<String>) {
        self.suspicious = true;
        self.score += score;
        self.flags.push(flag.into());
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HumanAssessment {
    pub is_human:    bool,
    pub human_score: f64,
    pub confidence:  f64,
    pub indicators:  Vec<String>,
}

// ── Detection result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl DetectionLevel {
    pub fn from_score(score: f64, cfg: &ScoringConfig) -> Self {
        if score >= cfg.high_threshold        { Self::High }
        else if score >= cfg.medium_threshold { Self::Medium }
        else if score >= cfg.low_threshold    { Self::Low }
        else                                  { Self::None }
    }
}

impl fmt::Display for DetectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None   => write!(f, "none"),
            Self::Low    => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High   => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionDetails {
    pub signals:            Vec<Signal>,
    pub human:              Option<HumanAssessment>,
    pub gating:             Vec<String>,
    pub raw_score:          f64,
    pub signal_count:       usize,
    pub geometric_evidence: bool,
    pub event_count:        usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub score:         f64,
    pub level:         DetectionLevel,
    pub flags:         Vec<String>,
    pub should_record: bool,
    /// True when this is a reused result from an earlier analysis.
    pub cached:        bool,
    pub details:       Option<DetectionDetails>,
}

impl DetectionResult {
    /// Answer for input that is not analysed at all.
    pub fn neutral() -> Self { Self::default() }

    pub fn reused(&self, reason: &str) -> Self {
        let mut r = self.clone();
        r.cached = true;
        r.flags.retain(|f| f != "CACHED" && f != "THROTTLED" && f != "RATE_LIMITED");
        r.flags.push("CACHED".into());
        r.flags.push(reason.into());
        r
    }
}

// ── Persistence-facing types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    BotPattern,
    ScriptedLine,
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BotPattern   => write!(f, "bot_pattern"),
            Self::ScriptedLine => write!(f, "scripted_line"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Pending,
    Dismissed,
    Banned,
}

/// Fields for a record the sink has not stored yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDetection {
    pub actor:          ActorKey,
    pub anon_id:        Option<String>,
    pub canvas_id:      u32,
    pub x:              i32,
    pub y:              i32,
    pub score:          f64,
    pub level:          DetectionLevel,
    pub detection_type: DetectionType,
    pub details:        serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id:             DetectionId,
    pub actor:          ActorKey,
    pub anon_id:        Option<String>,
    pub canvas_id:      u32,
    pub x:              i32,
    pub y:              i32,
    pub score:          f64,
    pub level:          DetectionLevel,
    pub detection_type: DetectionType,
    pub details:        serde_json::Value,
    pub status:         DetectionStatus,
    pub created_at:     DateTime<Utc>,
    pub video_path:     Option<PathBuf>,
    pub video_start_ms: Option<i64>,
    pub video_end_ms:   Option<i64>,
}

impl DetectionRecord {
    pub fn from_new(id: DetectionId, new: NewDetection) -> Self {
        Self {
            id,
            actor:          new.actor,
            anon_id:        new.anon_id,
            canvas_id:      new.canvas_id,
            x:              new.x,
            y:              new.y,
            score:          new.score,
            level:          new.level,
            detection_type: new.detection_type,
            details:        new.details,
            status:         DetectionStatus::Pending,
            created_at:     Utc::now(),
            video_path:     None,
            video_start_ms: None,
            video_end_ms:   None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(user_id: Option<u64>, ip: &str, x: f64, color: Option<i64>) -> PixelPlacement {
        PixelPlacement {
            user_id, ip: ip.into(), canvas_id: 0, x, y: 5.0, color,
            device_id: None, timestamp_ms: None,
        }
    }

    #[test]
    fn user_id_takes_precedence_over_ip() {
        assert_eq!(ActorKey::resolve(Some(7), "10.0.0.1"), Some(ActorKey::User(7)));
        assert_eq!(ActorKey::resolve(None, "10.0.0.1"), Some(ActorKey::Ip("10.0.0.1".into())));
        assert_eq!(ActorKey::resolve(None, "  "), None);
    }

    #[test]
    fn actor_key_string_form_parses_back() {
        for key in [ActorKey::User(42), ActorKey::Ip("2001:db8::1".into())] {
            let s = key.to_string();
            assert_eq!(s.parse::<ActorKey>().unwrap(), key);
        }
        assert!("nobody".parse::<ActorKey>().is_err());
    }

    #[test]
    fn validation_rejects_bad_input() {
        assert!(placement(None, "1.1.1.1", 3.0, Some(4)).validate().is_some());
        assert!(placement(None, "1.1.1.1", 3.0, None).validate().is_some());
        assert!(placement(None, "1.1.1.1", f64::NAN, Some(4)).validate().is_none());
        assert!(placement(None, "1.1.1.1", f64::INFINITY, Some(4)).validate().is_none());
        assert!(placement(None, "1.1.1.1", 2.0e6, Some(4)).validate().is_none());
        assert!(placement(None, "1.1.1.1", 3.0, Some(-1)).validate().is_none());
        assert!(placement(None, "1.1.1.1", 3.0, Some(256)).validate().is_none());
        assert!(placement(None, "", 3.0, Some(1)).validate().is_none());
    }

    #[test]
    fn levels_follow_thresholds() {
        let cfg = ScoringConfig::default();
        assert_eq!(DetectionLevel::from_score(0.0, &cfg), DetectionLevel::None);
        assert_eq!(DetectionLevel::from_score(30.0, &cfg), DetectionLevel::Low);
        assert_eq!(DetectionLevel::from_score(55.0, &cfg), DetectionLevel::Medium);
        assert_eq!(DetectionLevel::from_score(100.0, &cfg), DetectionLevel::High);
    }

    #[test]
    fn reused_result_is_flagged_once() {
        let r = DetectionResult { score: 40.0, flags: vec!["BURST".into()], ..Default::default() };
        let again = r.reused("THROTTLED").reused("RATE_LIMITED");
        assert!(again.cached);
        assert_eq!(again.flags, vec!["BURST", "CACHED", "RATE_LIMITED"]);
    }
}
