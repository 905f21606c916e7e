// pixelguard/src/scripted_line.rs
//
// Deterministic scripted-line detector.
//
// Independent of the probabilistic score: a run of placements that is
// simultaneously collinear, strictly monotone along the line and evenly
// spaced to within a few percent is not something a hand on a mouse or a
// touchscreen produces. A match is reported with score 100 through the same
// persistence gate and recorder as the probabilistic detector.
//
// Each actor keeps its own small trace (max_points, max_time_window_ms),
// separate from the main history ring.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{ConfigHandle, ScriptedLineConfig};
use crate::engine::gate::{Candidate, PersistenceGate};
use crate::events::{ActorKey, DetectionLevel, DetectionType, NewDetection, PixelPlacement};
use crate::state::ring::RingBuffer;
use crate::stats::EngineStats;

pub const SCRIPTED_LINE_SCORE: f64 = 100.0;
const MIN_STEP_PX: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
    pub x: f64,
    pub y: f64,
    pub t: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineDirection {
    Horizontal,
    Vertical,
    Diagonal45,
    Diagonal,
}

impl LineDirection {
    /// `angle` in degrees from the x axis, folded into [0, 90].
    pub fn classify(angle: f64) -> Self {
        if angle < 10.0 {
            Self::Horizontal
        } else if angle > 80.0 {
            Self::Vertical
        } else if (35.0..=55.0).contains(&angle) {
            Self::Diagonal45
        } else {
            Self::Diagonal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineMatch {
    pub start:       TracePoint,
    pub end:         TracePoint,
    pub points:      usize,
    pub length_px:   f64,
    pub spacing_px:  f64,
    pub angle_deg:   f64,
    pub direction:   LineDirection,
    pub duration_ms: i64,
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 { return 0.0; }
    if n % 2 == 1 { sorted[n / 2] } else { (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0 }
}

fn check_candidate(pts: &[TracePoint], cfg: &ScriptedLineConfig) -> Option<LineMatch> {
    let (a, b) = (pts.first()?, pts.last()?);
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length = (dx * dx + dy * dy).sqrt();
    if length < MIN_STEP_PX { return None; }
    let (ux, uy) = (dx / length, dy / length);

    let mut proj = Vec::with_capacity(pts.len());
    for p in pts {
        let (px, py) = (p.x - a.x, p.y - a.y);
        if (px * uy - py * ux).abs() > cfg.collinearity_tolerance_px {
            return None;
        }
        proj.push(px * ux + py * uy);
    }

    let steps: Vec<f64> = proj.windows(2).map(|w| w[1] - w[0]).collect();
    if steps.iter().any(|&s| s < MIN_STEP_PX) {
        return None;
    }
    let mut sorted = steps.clone();
    sorted.sort_by(|x, y| x.total_cmp(y));
    let spacing = median(&sorted);
    if spacing < cfg.min_spacing_px || spacing > cfg.max_spacing_px {
        return None;
    }
    let tol = cfg.spacing_tolerance_rel * spacing;
    if steps.iter().any(|s| (s - spacing).abs() > tol) {
        return None;
    }

    let angle = dy.abs().atan2(dx.abs()).to_degrees();
    Some(LineMatch {
        start:       *a,
        end:         *b,
        points:      pts.len(),
        length_px:   length,
        spacing_px:  spacing,
        angle_deg:   angle,
        direction:   LineDirection::classify(angle),
        duration_ms: b.t - a.t,
    })
}

/// Longest scripted line in `points`, scanning start offsets oldest first and
/// trying the longest candidate from each start before shorter ones.
pub fn find_scripted_line(points: &[TracePoint], cfg: &ScriptedLineConfig) -> Option<LineMatch> {
    let min = cfg.min_points.max(2);
    if points.len() < min { return None; }

    let mut pts = points.to_vec();
    pts.sort_by(|p, q| p.t.cmp(&q.t).then(p.x.total_cmp(&q.x)).then(p.y.total_cmp(&q.y)));

    for start in 0..=pts.len() - min {
        for end in (start + min..=pts.len()).rev() {
            if let Some(m) = check_candidate(&pts[start..end], cfg) {
                return Some(m);
            }
        }
    }
    None
}

// ── Per-actor detector ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptedLineResult {
    pub detected: bool,
    pub score:    f64,
    pub level:    DetectionLevel,
    pub line:     Option<LineMatch>,
}

#[derive(Debug)]
struct Trace {
    points:         RingBuffer<TracePoint>,
    canvas_id:      u32,
    anon_id:        Option<String>,
    last_activity:  i64,
    last_detection: Option<i64>,
}

pub struct ScriptedLineDetector {
    traces: DashMap<ActorKey, Arc<Mutex<Trace>>>,
    config: ConfigHandle,
    gate:   Arc<PersistenceGate>,
    stats:  Arc<EngineStats>,
}

impl ScriptedLineDetector {
    pub fn new(config: ConfigHandle, gate: Arc<PersistenceGate>, stats: Arc<EngineStats>) -> Self {
        Self { traces: DashMap::new(), config, gate, stats }
    }

    pub fn record_pixel(&self, placement: &PixelPlacement) -> ScriptedLineResult {
        let now_ms = placement.timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.record_pixel_at(placement, now_ms)
    }

    pub fn record_pixel_at(&self, placement: &PixelPlacement, now_ms: i64) -> ScriptedLineResult {
        let cfg = self.config.current();
        let sl = &cfg.scripted_line;
        if !sl.enabled { return ScriptedLineResult::default(); }
        let Some(valid) = placement.validate() else { return ScriptedLineResult::default() };

        let slot = match self.traces.get(&valid.actor) {
            Some(t) => Arc::clone(t.value()),
            None => {
                if self.traces.len() >= cfg.limits.max_users_tracked {
                    return ScriptedLineResult::default();
                }
                let trace = Trace {
                    points:         RingBuffer::with_capacity(sl.max_points),
                    canvas_id:      valid.canvas_id,
                    anon_id:        None,
                    last_activity:  now_ms,
                    last_detection: None,
                };
                Arc::clone(self.traces.entry(valid.actor.clone()).or_insert_with(|| Arc::new(Mutex::new(trace))).value())
            }
        };

        let mut tr = slot.lock();
        if tr.points.capacity() != sl.max_points.max(1) {
            tr.points.resize(sl.max_points);
        }
        tr.points.push(TracePoint { x: placement.x, y: placement.y, t: now_ms });
        tr.points.pop_front_while(|p| now_ms - p.t > sl.max_time_window_ms);
        tr.last_activity = now_ms;
        tr.canvas_id = valid.canvas_id;
        if valid.device_id.is_some() {
            tr.anon_id = valid.device_id.clone();
        }

        if let Some(last) = tr.last_detection {
            if now_ms - last < sl.detection_cooldown_ms {
                return ScriptedLineResult::default();
            }
        }
        if tr.points.len() < sl.min_points {
            return ScriptedLineResult::default();
        }

        let points: Vec<TracePoint> = tr.points.iter().copied().collect();
        let Some(line) = find_scripted_line(&points, sl) else { return ScriptedLineResult::default() };

        tr.last_detection = Some(now_ms);
        tr.points.clear();
        let (canvas_id, anon_id) = (tr.canvas_id, tr.anon_id.clone());
        drop(tr);

        EngineStats::bump(&self.stats.scripted_lines);
        info!(
            "SCRIPTED_LINE actor={} points={} spacing={:.2}px direction={:?}",
            valid.actor, line.points, line.spacing_px, line.direction
        );

        let candidate = Candidate {
            detection: NewDetection {
                actor:          valid.actor.clone(),
                anon_id,
                canvas_id,
                x:              line.end.x.round() as i32,
                y:              line.end.y.round() as i32,
                score:          SCRIPTED_LINE_SCORE,
                level:          DetectionLevel::High,
                detection_type: DetectionType::ScriptedLine,
                details:        json!({ "line": line, "flags": ["SCRIPTED_LINE"] }),
            },
            should_record: cfg.recording.enabled && SCRIPTED_LINE_SCORE >= cfg.recording.min_score,
        };
        self.gate.submit(candidate, now_ms, cfg.limits.db_write_cooldown_ms);

        ScriptedLineResult {
            detected: true,
            score:    SCRIPTED_LINE_SCORE,
            level:    DetectionLevel::High,
            line:     Some(line),
        }
    }

    /// Drop traces idle for longer than idle_timeout_ms.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let idle = self.config.current().scripted_line.idle_timeout_ms;
        let before = self.traces.len();
        self.traces.retain(|_, t| now_ms - t.lock().last_activity <= idle);
        let evicted = before.saturating_sub(self.traces.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.traces.len(), "scripted-line trace sweep");
        }
        evicted
    }

    pub fn tracked(&self) -> usize { self.traces.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigPatch, RecordingPatch};
    use crate::recorder::Recorder;
    use crate::sink::MemorySink;

    fn vertical(steps: &[f64]) -> Vec<TracePoint> {
        let mut y = 100.0;
        let mut out = vec![TracePoint { x: 40.0, y, t: 0 }];
        for (i, s) in steps.iter().enumerate() {
            y += s;
            out.push(TracePoint { x: 40.0, y, t: (i as i64 + 1) * 200 });
        }
        out
    }

    #[test]
    fn evenly_spaced_vertical_line_is_detected() {
        let m = find_scripted_line(&vertical(&[5.0; 11]), &ScriptedLineConfig::default()).unwrap();
        assert_eq!(m.points, 12);
        assert_eq!(m.direction, LineDirection::Vertical);
        assert!((m.spacing_px - 5.0).abs() < 1e-9);
        assert_eq!(m.duration_ms, 2_200);
    }

    #[test]
    fn one_uneven_step_breaks_the_line() {
        let mut steps = [5.0; 11];
        steps[5] = 5.5;
        assert!(find_scripted_line(&vertical(&steps), &ScriptedLineConfig::default()).is_none());
    }

    #[test]
    fn wobble_beyond_tolerance_is_not_collinear() {
        let pts: Vec<TracePoint> = (0..12)
            .map(|i| TracePoint { x: i as f64 * 4.0, y: if i == 6 { 1.5 } else { 0.0 }, t: i * 100 })
            .collect();
        assert!(find_scripted_line(&pts, &ScriptedLineConfig::default()).is_none());
    }

    #[test]
    fn stray_points_before_the_line_are_skipped() {
        let mut pts = vec![
            TracePoint { x: 300.0, y: 12.0, t: 0 },
            TracePoint { x: 9.0, y: 250.0, t: 50 },
        ];
        pts.extend((0..10).map(|i| TracePoint { x: 10.0 + i as f64 * 3.0, y: 20.0 + i as f64 * 3.0, t: 100 + i * 100 }));
        let m = find_scripted_line(&pts, &ScriptedLineConfig::default()).unwrap();
        assert_eq!(m.points, 10);
        assert_eq!(m.direction, LineDirection::Diagonal45);
    }

    #[test]
    fn direction_classes() {
        assert_eq!(LineDirection::classify(3.0), LineDirection::Horizontal);
        assert_eq!(LineDirection::classify(85.0), LineDirection::Vertical);
        assert_eq!(LineDirection::classify(45.0), LineDirection::Diagonal45);
        assert_eq!(LineDirection::classify(20.0), LineDirection::Diagonal);
    }

    fn detector(dir: &std::path::Path) -> (Arc<MemorySink>, ScriptedLineDetector) {
        let config = ConfigHandle::new(Config::default());
        config.update(&ConfigPatch {
            recording: Some(RecordingPatch { output_dir: Some(dir.to_path_buf()), ..Default::default() }),
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::new());
        let stats = Arc::new(EngineStats::new());
        let recorder = Recorder::new(sink.clone(), config.clone());
        let gate = Arc::new(PersistenceGate::new(sink.clone(), recorder, stats.clone()));
        (sink, ScriptedLineDetector::new(config, gate, stats))
    }

    fn placement(x: f64, y: f64) -> PixelPlacement {
        PixelPlacement {
            user_id: None, ip: "198.51.100.20".into(), canvas_id: 4, x, y,
            color: Some(2), device_id: None, timestamp_ms: None,
        }
    }

    #[tokio::test]
    async fn detector_reports_once_per_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, det) = detector(dir.path());
        let mut hits = Vec::new();
        for i in 0..30 {
            let r = det.record_pixel_at(&placement(10.0 + i as f64 * 6.0, 80.0), i * 150);
            if r.detected { hits.push(i); }
        }
        // first hit once min_points are buffered, then the cooldown holds
        assert_eq!(hits, vec![9]);

        for _ in 0..100 {
            if sink.create_count() >= 1 { break; }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let records = sink.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].detection_type, DetectionType::ScriptedLine);
        assert_eq!(records[0].score, 100.0);
        assert_eq!(records[0].actor, ActorKey::Ip("198.51.100.20".into()));
    }

    #[test]
    fn idle_traces_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let (_, det) = detector(dir.path());
        det.record_pixel_at(&placement(1.0, 1.0), 0);
        assert_eq!(det.tracked(), 1);
        assert_eq!(det.sweep(30_000), 0);
        assert_eq!(det.sweep(61_000), 1);
        assert_eq!(det.tracked(), 0);
    }
}
