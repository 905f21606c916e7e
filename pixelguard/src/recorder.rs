// pixelguard/src/recorder.rs
//
// Evidence recorder: a replayable JSON frame log around a detection.
//
// Lifecycle:
//   start:    only from the persistence gate, after a successful create;
//             one session per actor, global cap max_active_recordings
//   frames:   the placement pipeline feeds add_frame for every pixel; frames
//             for actors without a session are ignored
//   stop:     explicit, or the max_duration_ms timer; writes
//             {metadata, frames} and reports path + time range to the sink
//   cancel:   discard without writing
//   cleanup:  moderator resolved the detection: delete the file and clear
//             the persisted evidence fields
//
// Session bookkeeping sits behind one parking_lot::Mutex that is never held
// across an await.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::error::Result;
use crate::events::{ActorKey, DetectionId};
use crate::sink::DetectionSink;

const DEFAULT_FRAME_TYPE: &str = "pixel";

#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind:      String,
    #[serde(flatten)]
    pub payload:   Map<String, Value>,
}

impl Frame {
    /// Object payloads keep their own `type` (default "pixel"); anything else
    /// is wrapped as `{"data": …}`.
    pub fn from_value(timestamp: i64, value: Value) -> Self {
        let mut payload = match value {
            Value::Object(m) => m,
            other => {
                let mut m = Map::new();
                m.insert("data".into(), other);
                m
            }
        };
        let kind = match payload.remove("type") {
            Some(Value::String(s)) => s,
            _ => DEFAULT_FRAME_TYPE.to_string(),
        };
        payload.remove("timestamp");
        Self { timestamp, kind, payload }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub detection_id:   DetectionId,
    pub actor:          ActorKey,
    pub canvas_id:      u32,
    pub center_x:       i32,
    pub center_y:       i32,
    pub zoom_level:     f64,
    pub start_time:     i64,
    pub end_time:       i64,
    pub duration_ms:    i64,
    pub frame_count:    usize,
    pub dropped_frames: usize,
}

#[derive(Serialize)]
struct RecordingFile<'a> {
    metadata: RecordingMetadata,
    frames:   &'a [Frame],
}

#[derive(Debug)]
struct Session {
    actor:          ActorKey,
    canvas_id:      u32,
    center:         (i32, i32),
    zoom:           f64,
    start_ms:       i64,
    frames:         Vec<Frame>,
    dropped_frames: usize,
    timer:          Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Sessions {
    by_id:    HashMap<DetectionId, Session>,
    by_actor: HashMap<ActorKey, DetectionId>,
}

impl Sessions {
    fn take(&mut self, id: DetectionId) -> Option<Session> {
        let session = self.by_id.remove(&id)?;
        if self.by_actor.get(&session.actor) == Some(&id) {
            self.by_actor.remove(&session.actor);
        }
        Some(session)
    }
}

pub struct Recorder {
    sessions: Mutex<Sessions>,
    sink:     Arc<dyn DetectionSink>,
    config:   ConfigHandle,
}

impl Recorder {
    pub fn new(sink: Arc<dyn DetectionSink>, config: ConfigHandle) -> Arc<Self> {
        Arc::new(Self { sessions: Mutex::new(Sessions::default()), sink, config })
    }

    /// Begin recording for a freshly created detection. `None` when the id or
    /// the actor already has a session, the global cap is reached, or
    /// recording is disabled, or there is no tokio runtime to run the
    /// max-duration timer on.
    pub fn start(
        self:      &Arc<Self>,
        id:        DetectionId,
        actor:     ActorKey,
        canvas_id: u32,
        center:    (i32, i32),
        zoom:      Option<f64>,
    ) -> Option<DetectionId> {
        let cfg = self.config.current();
        let rc = &cfg.recording;
        if !rc.enabled { return None; }

        let mut s = self.sessions.lock();
        if s.by_id.contains_key(&id) || s.by_actor.contains_key(&actor) {
            return None;
        }
        if s.by_id.len() >= rc.max_active_recordings {
            debug!("recording cap reached ({}), not recording detection {}", rc.max_active_recordings, id);
            return None;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime, detection {} not recorded", id);
            return None;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let max = Duration::from_millis(rc.max_duration_ms);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(max).await;
            if let Some(rec) = weak.upgrade() {
                rec.finish(id, true).await;
            }
        });

        s.by_actor.insert(actor.clone(), id);
        s.by_id.insert(id, Session {
            actor:          actor.clone(),
            canvas_id,
            center,
            zoom:           zoom.unwrap_or(rc.default_zoom),
            start_ms:       Utc::now().timestamp_millis(),
            frames:         Vec::new(),
            dropped_frames: 0,
            timer:          Some(timer),
        });
        info!("RECORDING_START detection={} actor={} canvas={} center=({},{})", id, actor, canvas_id, center.0, center.1);
        Some(id)
    }

    /// Append a frame to the actor's active session. Returns false when there
    /// is no session or the frame cap dropped it.
    pub fn add_frame(&self, actor: &ActorKey, frame: Value) -> bool {
        let max_frames = self.config.current().recording.max_frames_per_recording;
        let mut s = self.sessions.lock();
        let Some(id) = s.by_actor.get(actor).copied() else { return false };
        let Some(session) = s.by_id.get_mut(&id) else { return false };
        if session.frames.len() >= max_frames {
            session.dropped_frames += 1;
            return false;
        }
        session.frames.push(Frame::from_value(Utc::now().timestamp_millis(), frame));
        true
    }

    /// Finish a session: write the frame log and report it to the sink.
    pub async fn stop(&self, id: DetectionId) -> Option<PathBuf> {
        self.finish(id, false).await
    }

    async fn finish(&self, id: DetectionId, from_timer: bool) -> Option<PathBuf> {
        let mut session = self.sessions.lock().take(id)?;
        if let Some(timer) = session.timer.take() {
            if !from_timer { timer.abort(); }
        }

        let end_ms = Utc::now().timestamp_millis();
        let metadata = RecordingMetadata {
            detection_id:   id,
            actor:          session.actor.clone(),
            canvas_id:      session.canvas_id,
            center_x:       session.center.0,
            center_y:       session.center.1,
            zoom_level:     session.zoom,
            start_time:     session.start_ms,
            end_time:       end_ms,
            duration_ms:    end_ms - session.start_ms,
            frame_count:    session.frames.len(),
            dropped_frames: session.dropped_frames,
        };
        let dir = self.config.current().recording.output_dir.clone();
        let path = dir.join(format!("detection_{}_{}.json", id, session.start_ms));

        if let Err(e) = write_recording(&dir, &path, metadata, &session.frames).await {
            warn!("recording write failed detection={} path={}: {}", id, path.display(), e);
            return None;
        }
        info!(
            "RECORDING_STOP detection={} frames={} duration_ms={} timer={} path={}",
            id, session.frames.len(), end_ms - session.start_ms, from_timer, path.display()
        );

        if let Err(e) = self.sink.update_detection_video(id, &path, session.start_ms, end_ms).await {
            warn!("evidence path update failed detection={}: {}", id, e);
        }
        Some(path)
    }

    /// Drop a session without writing anything.
    pub fn cancel(&self, id: DetectionId) -> bool {
        match self.sessions.lock().take(id) {
            Some(mut session) => {
                if let Some(timer) = session.timer.take() { timer.abort(); }
                debug!("recording cancelled detection={}", id);
                true
            }
            None => false,
        }
    }

    /// Delete the evidence file (if any) and clear the persisted path fields.
    pub async fn cleanup(&self, id: DetectionId, path: Option<&Path>) -> Result<()> {
        self.cancel(id);
        if let Some(p) = path {
            match tokio::fs::remove_file(p).await {
                Ok(()) => debug!("evidence removed detection={} path={}", id, p.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.sink.clear_detection_video(id).await
    }

    /// Stop every active session (shutdown).
    pub async fn stop_all(&self) -> Vec<PathBuf> {
        let ids: Vec<DetectionId> = self.sessions.lock().by_id.keys().copied().collect();
        let mut paths = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.finish(id, false).await {
                paths.push(p);
            }
        }
        paths
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().by_id.len()
    }

    pub fn is_recording(&self, actor: &ActorKey) -> bool {
        self.sessions.lock().by_actor.contains_key(actor)
    }
}

async fn write_recording(dir: &Path, path: &Path, metadata: RecordingMetadata, frames: &[Frame]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let body = serde_json::to_vec(&RecordingFile { metadata, frames })?;
    tokio::fs::write(path, body).await?;
    Ok(())
}
