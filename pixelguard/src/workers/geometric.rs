// pixelguard/src/workers/geometric.rs
//
// Geometric worker: shapes no hand draws perfectly.
//
// Sub-detectors (independent, may co-fire):
//   line:       longest pixel-exact run along one of 8 unit directions
//   rectangle:  most points on the bounding-box edge, edge well covered
//   grid:       evenly spaced distinct x and y coordinates
//   circle:     constant radius around the centroid of a sliding window;
//               only tried when nothing above fired
//
// This worker is the expensive one, so the detector only calls it when the
// cheap rhythm signals already look off (see workers::run_all).

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::config::GeometricConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{mean, round2, tail, variance};

const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0), (-1, 0), (0, 1), (0, -1),
    (1, 1), (-1, -1), (1, -1), (-1, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRun {
    pub length:    usize,
    pub direction: (i32, i32),
}

/// Longest run where each point equals the previous one plus a fixed unit
/// step, within `max_dev` on each axis.
pub fn longest_line(points: &[(i32, i32)], max_dev: i32) -> Option<LineRun> {
    if points.len() < 2 { return None; }
    let mut best: Option<LineRun> = None;
    for &(dx, dy) in &DIRECTIONS {
        let mut run = 1;
        let mut longest = 1;
        for w in points.windows(2) {
            let ex = w[0].0 + dx;
            let ey = w[0].1 + dy;
            if (w[1].0 - ex).abs() <= max_dev && (w[1].1 - ey).abs() <= max_dev {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 1;
            }
        }
        if best.map(|b| longest > b.length).unwrap_or(true) {
            best = Some(LineRun { length: longest, direction: (dx, dy) });
        }
    }
    best
}

fn bbox(points: &[(i32, i32)]) -> Option<(i32, i32, i32, i32)> {
    let first = points.first()?;
    Some(points.iter().fold((first.0, first.1, first.0, first.1), |(x0, y0, x1, y1), &(x, y)| {
        (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
    }))
}

/// Returns (edge_ratio, perimeter_coverage) when the box is a real 2-D box.
pub fn rectangle_fit(points: &[(i32, i32)]) -> Option<(f64, f64)> {
    let (x0, y0, x1, y1) = bbox(points)?;
    let w = (x1 - x0 + 1) as i64;
    let h = (y1 - y0 + 1) as i64;
    if w < 3 || h < 3 { return None; }

    let on_edge = |&(x, y): &(i32, i32)| x == x0 || x == x1 || y == y0 || y == y1;
    let edge_hits = points.iter().filter(|p| on_edge(p)).count();
    let edge_pixels: HashSet<(i32, i32)> = points.iter().copied().filter(|p| on_edge(p)).collect();
    let perimeter = 2 * (w + h) - 4;

    Some((
        edge_hits as f64 / points.len() as f64,
        edge_pixels.len() as f64 / perimeter as f64,
    ))
}

fn uniform_spacing(coords: &BTreeSet<i32>, tolerance: i32) -> Option<i32> {
    let v: Vec<i32> = coords.iter().copied().collect();
    let gaps: Vec<i32> = v.windows(2).map(|w| w[1] - w[0]).collect();
    let first = *gaps.first()?;
    if gaps.iter().all(|g| (g - first).abs() <= tolerance) { Some(first) } else { None }
}

/// Uniform (x, y) spacing when both axes carry at least three distinct values.
pub fn grid_spacing(points: &[(i32, i32)], tolerance: i32) -> Option<(i32, i32)> {
    let xs: BTreeSet<i32> = points.iter().map(|p| p.0).collect();
    let ys: BTreeSet<i32> = points.iter().map(|p| p.1).collect();
    if xs.len() < 3 || ys.len() < 3 { return None; }
    Some((uniform_spacing(&xs, tolerance)?, uniform_spacing(&ys, tolerance)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircleFit {
    pub center_x:   f64,
    pub center_y:   f64,
    pub radius:     f64,
    pub radius_std: f64,
}

/// First sliding window whose points sit on a circle around their centroid.
pub fn find_circle(points: &[(i32, i32)], window: usize, min_radius: f64, max_error: f64) -> Option<CircleFit> {
    let window = window.max(5);
    if points.len() < window { return None; }
    let step = (window / 2).max(1);

    let mut start = 0;
    while start + window <= points.len() {
        let pts = &points[start..start + window];
        let distinct: HashSet<&(i32, i32)> = pts.iter().collect();
        if distinct.len() * 4 >= window * 3 {
            let cx = pts.iter().map(|p| p.0 as f64).sum::<f64>() / window as f64;
            let cy = pts.iter().map(|p| p.1 as f64).sum::<f64>() / window as f64;
            let radii: Vec<f64> = pts.iter()
                .map(|p| ((p.0 as f64 - cx).powi(2) + (p.1 as f64 - cy).powi(2)).sqrt())
                .collect();
            let r = mean(&radii);
            if r >= min_radius {
                let std = variance(&radii).sqrt();
                if std <= max_error {
                    return Some(CircleFit { center_x: cx, center_y: cy, radius: r, radius_std: std });
                }
            }
        }
        start += step;
    }
    None
}

pub fn analyze(events: &[PixelEvent], cfg: &GeometricConfig) -> Signal {
    let points: Vec<(i32, i32)> = tail(events, cfg.window_size).iter().map(|e| (e.x, e.y)).collect();
    let mut signal = Signal::new(SignalKind::Geometric).with_meta("n", json!(points.len()));

    // ── Line ──────────────────────────────────────────────────────────────────
    if let Some(run) = longest_line(&points, cfg.max_deviation_pixels) {
        signal.meta.insert("longest_line".into(), json!(run));
        if run.length >= cfg.min_line_length {
            signal.add(cfg.line_score, format!("LINE:{}px", run.length));
            if run.length >= cfg.perfect_line_threshold {
                signal.add(cfg.perfect_line_bonus, "PERFECT_LINE");
            }
        }
    }

    // ── Rectangle ─────────────────────────────────────────────────────────────
    if points.len() >= cfg.rectangle_min_points {
        if let Some((edge_ratio, coverage)) = rectangle_fit(&points) {
            signal.meta.insert("rectangle_edge_ratio".into(), json!(round2(edge_ratio)));
            if edge_ratio >= cfg.rectangle_edge_ratio && coverage >= cfg.rectangle_perimeter_coverage {
                signal.add(cfg.rectangle_score, format!("RECTANGLE:{:.0}%_edge", edge_ratio * 100.0));
            }
        }
    }

    // ── Grid ──────────────────────────────────────────────────────────────────
    if points.len() >= cfg.grid_min_points {
        if let Some((sx, sy)) = grid_spacing(&points, cfg.grid_spacing_tolerance) {
            if sx >= cfg.grid_min_spacing && sy >= cfg.grid_min_spacing {
                signal.add(cfg.grid_score, format!("GRID:{}x{}", sx, sy));
            }
        }
    }

    // ── Circle ────────────────────────────────────────────────────────────────
    if !signal.suspicious {
        if let Some(fit) = find_circle(&points, cfg.circle_window, cfg.circle_min_radius, cfg.circle_max_radius_error) {
            signal.add(cfg.circle_score, format!("CIRCLE:r={:.1}", fit.radius));
            signal.meta.insert("circle".into(), json!(fit));
        }
    }

    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(points: &[(i32, i32)]) -> Vec<PixelEvent> {
        points.iter().enumerate()
            .map(|(i, &(x, y))| PixelEvent { x, y, color: Some(1), timestamp_ms: i as i64 * 100, canvas_id: 0 })
            .collect()
    }

    #[test]
    fn finds_perfect_diagonal() {
        let mut pts = vec![(50, 50), (3, 9)];
        pts.extend((0..25).map(|i| (10 - i, 10 - i)));
        let run = longest_line(&pts, 0).unwrap();
        assert_eq!(run.length, 25);
        assert_eq!(run.direction, (-1, -1));

        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(sig.flags.contains(&"PERFECT_LINE".to_string()));
        assert_eq!(sig.score, 30.0);
    }

    #[test]
    fn tolerance_allows_wobble() {
        let pts: Vec<(i32, i32)> = (0..12).map(|i| (i, i % 2)).collect();
        assert!(longest_line(&pts, 0).unwrap().length < 8);
        assert_eq!(longest_line(&pts, 1).unwrap().length, 12);
    }

    #[test]
    fn rectangle_outline() {
        let mut pts = Vec::new();
        for x in 0..10 { pts.push((x, 0)); }
        for y in 1..8  { pts.push((9, y)); }
        for x in (0..10).rev() { pts.push((x, 7)); }
        for y in (1..7).rev() { pts.push((0, y)); }
        let (edge, coverage) = rectangle_fit(&pts).unwrap();
        assert_eq!(edge, 1.0);
        assert!(coverage > 0.99);
        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(sig.flags.iter().any(|f| f.starts_with("RECTANGLE")));
    }

    #[test]
    fn filled_block_is_not_a_rectangle_or_grid() {
        let pts: Vec<(i32, i32)> = (0..64).map(|i| (i % 8, i / 8)).collect();
        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(!sig.flags.iter().any(|f| f.starts_with("RECTANGLE") || f.starts_with("GRID")));
    }

    #[test]
    fn dotted_lattice_is_a_grid() {
        let pts: Vec<(i32, i32)> = (0..16).map(|i| ((i % 4) * 5, (i / 4) * 5)).collect();
        assert_eq!(grid_spacing(&pts, 1), Some((5, 5)));
        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(sig.flags.iter().any(|f| f.starts_with("GRID")));
    }

    #[test]
    fn circle_found_when_nothing_else_fires() {
        let pts: Vec<(i32, i32)> = (0..16)
            .map(|i| {
                let a = i as f64 / 16.0 * std::f64::consts::TAU;
                ((100.0 + 10.0 * a.cos()).round() as i32, (100.0 + 10.0 * a.sin()).round() as i32)
            })
            .collect();
        let fit = find_circle(&pts, 16, 4.0, 1.0).unwrap();
        assert!((fit.radius - 10.0).abs() < 1.5);

        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(sig.flags.iter().any(|f| f.starts_with("CIRCLE")));
    }

    #[test]
    fn scribble_has_no_shapes() {
        let pts: Vec<(i32, i32)> = (0..40).map(|i| ((i * 37) % 23, (i * 11) % 17 + (i % 3))).collect();
        let sig = analyze(&events(&pts), &GeometricConfig::default());
        assert!(!sig.suspicious, "unexpected flags {:?}", sig.flags);
    }
}
