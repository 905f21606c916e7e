// pixelguard/src/lib.rs
//
// pixelguard: streaming bot detection for pixel placement events.
//
//   PixelPlacement ──► BotDetector ──► workers ──► fusion ──► PersistenceGate ──► DetectionSink
//                 └──► ScriptedLineDetector ──────────────────┘            └──► Recorder
//
// `PixelGuard` (service.rs) is the entry point; everything else is reachable
// through it.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod recorder;
pub mod scripted_line;
pub mod service;
pub mod sink;
pub mod state;
pub mod stats;
pub mod workers;

pub use config::{Config, ConfigPatch};
pub use error::{Error, Result};
pub use events::{ActorKey, DetectionLevel, DetectionResult, DetectionStatus, DetectionType, PixelPlacement};
pub use service::{PixelGuard, PlacementVerdict};
pub use sink::{DetectionSink, JsonlSink, MemorySink};
