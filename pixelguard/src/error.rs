// pixelguard/src/error.rs
//
// Library error type. Hot-path calls (record_pixel, add_recording_frame) never
// surface these; they exist for the collaborator seams (sink, recorder, config
// loading) where the caller decides whether to log or propagate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("detection sink error: {0}")]
    Sink(String),

    #[error("unknown detection id {0}")]
    UnknownDetection(u64),

    #[error("invalid config {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
