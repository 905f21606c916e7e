// pixelguard/src/workers/spatial.rs
//
// Spatial worker: where the pixels land.
//
//   dense cluster: many placements packed into a small bounding box
//   overlap:       the same coordinates painted over and over

use std::collections::HashSet;

use serde_json::json;

use crate::config::GeometricConfig;
use crate::events::{PixelEvent, Signal, SignalKind};
use crate::workers::stats::{round2, tail};

const MIN_POINTS: usize = 10;

pub fn analyze(events: &[PixelEvent], cfg: &GeometricConfig) -> Option<Signal> {
    let window = tail(events, cfg.spatial_window);
    let n = window.len();
    if n < MIN_POINTS { return None; }

    let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for e in window {
        x0 = x0.min(e.x);
        y0 = y0.min(e.y);
        x1 = x1.max(e.x);
        y1 = y1.max(e.y);
    }
    let area = (x1 as i64 - x0 as i64 + 1) * (y1 as i64 - y0 as i64 + 1);
    let density = n as f64 / area as f64;

    let distinct: HashSet<(i32, i32)> = window.iter().map(|e| (e.x, e.y)).collect();
    let overlap = 1.0 - distinct.len() as f64 / n as f64;

    let mut signal = Signal::new(SignalKind::Spatial);
    if density > cfg.cluster_min_density && area >= cfg.cluster_min_area {
        signal.add(cfg.cluster_score, format!("DENSE_CLUSTER:{:.2}", density));
    }
    if overlap > cfg.overlap_ratio && n >= cfg.overlap_min_points {
        signal.add(cfg.overlap_score, format!("HIGH_OVERLAP:{:.0}%", overlap * 100.0));
    }

    Some(signal
        .with_meta("n", json!(n))
        .with_meta("bbox_area", json!(area))
        .with_meta("density", json!(round2(density)))
        .with_meta("overlap_ratio", json!(round2(overlap))))
}
