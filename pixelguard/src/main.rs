// pixelguard/src/main.rs
//
// pixelguard: streaming bot detection for collaborative pixel canvases
//
// Two operational modes:
//   tail    follow a JSONL placement log as the canvas server appends to it
//   replay  replay a captured log at scaled speed, keeping original timestamps
//
// Usage:
//   pixelguard --mode tail --path /var/log/canvas/placements.jsonl
//   pixelguard --mode replay --path captured.jsonl --speed 10.0 --config tuning.json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pixelguard::events::ActorKey;
use pixelguard::{Config, DetectionLevel, JsonlSink, PixelGuard, PixelPlacement, PlacementVerdict};

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "pixelguard",
    about   = "Streaming bot detection for pixel placement events",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/pixelguard_feed.jsonl",
          help = "JSONL placement log path")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/pixelguard_output",
          help = "Detection store directory")]
    output: PathBuf,

    #[arg(long, help = "JSON config overrides, merged over the defaults")]
    config: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,    // follow a live JSONL log file
    Replay,  // replay a static JSONL file at scaled speed
}

// ── Pipeline ────────────────────────────────────────────────────────────────

struct Pipeline {
    guard: Arc<PixelGuard>,
}

impl Pipeline {
    fn process(&self, placement: PixelPlacement) {
        let verdict = self.guard.record_pixel(&placement);

        // Actors already under recording get every placement as a frame.
        if let Some(actor) = placement.actor_key() {
            self.guard.add_recording_frame(&actor, json!({
                "type":     "pixel",
                "x":        placement.x,
                "y":        placement.y,
                "color":    placement.color,
                "canvasId": placement.canvas_id,
            }));
            if should_print(&verdict) {
                print_alert(&actor, &verdict);
            }
        }
    }
}

fn should_print(v: &PlacementVerdict) -> bool {
    v.scripted_line.detected || (!v.detection.cached && v.detection.level >= DetectionLevel::Medium)
}

// ── Terminal output ─────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1m");
    println!("  ┌─┐┬─┐ ┬┌─┐┬  ┌─┐┬ ┬┌─┐┬─┐┌┬┐");
    println!("  ├─┘│┌┴┬┘├┤ │  │ ┬│ │├─┤├┬┘ ││");
    println!("  ┴  ┴┴ └─└─┘┴─┘└─┘└─┘┴ ┴┴└──┴┘");
    println!("\x1b[0m");
    println!("  \x1b[90mStreaming bot detection for pixel placement events\x1b[0m\n");
}

fn print_alert(actor: &ActorKey, v: &PlacementVerdict) {
    let reset = "\x1b[0m";

    if let Some(line) = v.scripted_line.line.as_ref() {
        println!("\n\x1b[95;1m▶ SCRIPTED LINE{}", reset);
        println!("  Actor   : \x1b[95;1m{}{}", actor, reset);
        println!("  Line    : {} pts  {:.1}px  spacing={:.2}px  {:?}  {}ms",
                 line.points, line.length_px, line.spacing_px, line.direction, line.duration_ms);
    }

    let d = &v.detection;
    if d.cached || d.level < DetectionLevel::Medium { return; }
    let color = match d.level {
        DetectionLevel::High   => "\x1b[91;1m",
        DetectionLevel::Medium => "\x1b[93;1m",
        _                      => "\x1b[96m",
    };
    let flags = d.flags.iter().take(5).cloned().collect::<Vec<_>>().join(" | ");

    println!("\n{}● {}{}", color, d.level, reset);
    println!("  Actor   : {}{}{}", color, actor, reset);
    println!("  Score   : {}{:.1}{}", color, d.score, reset);
    println!("  Record  : {}", d.should_record);
    println!("  Flags   : {}", flags);
}

async fn print_stats_loop(guard: Arc<PixelGuard>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let s       = guard.stats();
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  pixels={}  pps={:.1}  analyses={}  detections={}  lines={}  actors={}  recording={} ──\x1b[0m",
            elapsed, s.total_pixels_processed, s.total_pixels_processed as f64 / elapsed,
            s.total_analyses_run, s.total_detections, s.scripted_lines_detected,
            s.active_users, s.active_recordings,
        );
    }
}

// ── Event sources ───────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<PixelPlacement>) -> Result<()> {
    let file      = tokio::fs::File::open(&path).await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    while lines.next_line().await?.is_some() {}  // consume existing

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                match serde_json::from_str::<PixelPlacement>(line) {
                    Ok(mut p) => {
                        // live traffic is stamped on arrival
                        p.timestamp_ms = None;
                        if tx.send(p).await.is_err() { break; }
                    }
                    Err(e) => warn!("Parse error: {}", e),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<PixelPlacement>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut placements: Vec<PixelPlacement> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<PixelPlacement>(line) {
            Ok(p)  => placements.push(p),
            Err(e) => warn!("Parse error: {}", e),
        }
    }

    if placements.is_empty() { return Ok(()); }
    let base_wall = Instant::now();
    let stamped   = placements.iter().filter(|p| p.timestamp_ms.is_some()).count();
    if stamped < placements.len() {
        warn!("{} of {} placements carry no timestamp; they are scored at wall-clock time",
              placements.len() - stamped, placements.len());
    }
    placements.sort_by_key(|p| p.timestamp_ms.unwrap_or(i64::MAX));
    let base_ts = placements[0].timestamp_ms;
    let speed   = if speed > 0.0 { speed } else { 1.0 };

    for p in placements {
        if let (Some(base), Some(ts)) = (base_ts, p.timestamp_ms) {
            let offset = (ts - base).max(0) as f64 / speed / 1000.0;
            let target = base_wall + std::time::Duration::from_secs_f64(offset);
            let now    = Instant::now();
            if target > now {
                tokio::time::sleep(target - now).await;
            }
        }
        if tx.send(p).await.is_err() { break; }
    }
    info!("Replay of {} finished", path.display());
    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("pixelguard=info".parse()?))
        .compact().init();

    let cli    = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None       => Config::default(),
    };
    let sink     = Arc::new(JsonlSink::new(cli.output.clone())?);
    let guard    = PixelGuard::new(config, sink);
    let pipeline = Pipeline { guard: Arc::clone(&guard) };
    let start    = Instant::now();
    let (tx, mut rx) = mpsc::channel::<PixelPlacement>(16384);

    print_banner();

    tokio::spawn(print_stats_loop(Arc::clone(&guard), start));
    guard.spawn_sweeper();

    match cli.mode {
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
            println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                if let Err(e) = tail_jsonl(path, tx).await { warn!("tail stopped: {:#}", e); }
            });
        }

        Mode::Replay => {
            println!("  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x", cli.path.display(), cli.speed);
            println!("  Output: \x1b[90m{}\x1b[0m\n", cli.output.display());
            let path  = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                if let Err(e) = replay_jsonl(path, tx, speed).await { warn!("replay stopped: {:#}", e); }
            });
        }
    }

    println!("  Press Ctrl+C to stop.\n");

    // Placements are scored in arrival order; per-actor state depends on it.
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(p) => pipeline.process(p),
                None    => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let flushed = guard.shutdown().await;
    let s       = guard.stats();
    info!(
        "Shutdown: {} recordings flushed, {} pixels, {} detections, {} scripted lines",
        flushed.len(), s.total_pixels_processed, s.total_detections, s.scripted_lines_detected,
    );
    Ok(())
}
