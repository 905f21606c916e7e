// pixelguard/src/sink.rs
//
// Persistence collaborator seam.
//
// The engine never owns detection storage. It hands records to a
// DetectionSink and asks it two questions: "is there already a pending
// record for this actor?" and "where does the evidence for record N live?".
//
// Two sinks ship with the crate:
//   MemorySink: HashMap behind a mutex; tests and embedding
//   JsonlSink:  MemorySink index mirrored into append-only JSONL files
//               (detections.jsonl for records, audit_log.jsonl for every
//               mutation). Wire these files to the moderation backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{Error, Result};
use crate::events::{ActorKey, DetectionId, DetectionRecord, DetectionStatus, NewDetection};

#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn create_detection(&self, new: NewDetection) -> Result<DetectionRecord>;

    /// Most recent record for `actor` still in `pending` status.
    async fn pending_detection_for(&self, actor: &ActorKey) -> Result<Option<DetectionRecord>>;

    async fn update_detection_video(&self, id: DetectionId, path: &Path, start_ms: i64, end_ms: i64) -> Result<()>;

    async fn clear_detection_video(&self, id: DetectionId) -> Result<()>;

    async fn set_status(&self, id: DetectionId, status: DetectionStatus) -> Result<()>;
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<HashMap<DetectionId, DetectionRecord>>,
    next_id: AtomicU64,
    creates: AtomicU64,
    fail:    AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    /// Make every subsequent create fail (exercises the gate's error path).
    pub fn fail_creates(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    pub fn get(&self, id: DetectionId) -> Option<DetectionRecord> {
        self.records.lock().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<DetectionRecord> {
        let mut v: Vec<DetectionRecord> = self.records.lock().values().cloned().collect();
        v.sort_by_key(|r| r.id);
        v
    }

    fn insert(&self, new: NewDetection) -> Result<DetectionRecord> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(Error::Sink("create rejected".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = DetectionRecord::from_new(id, new);
        self.records.lock().insert(id, record.clone());
        self.creates.fetch_add(1, Ordering::Relaxed);
        Ok(record)
    }

    /// Undo an insert whose durable write failed.
    fn forget(&self, id: DetectionId) {
        if self.records.lock().remove(&id).is_some() {
            self.creates.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn pending_for(&self, actor: &ActorKey) -> Option<DetectionRecord> {
        self.records.lock()
            .values()
            .filter(|r| &r.actor == actor && r.status == DetectionStatus::Pending)
            .max_by_key(|r| r.id)
            .cloned()
    }

    fn modify(&self, id: DetectionId, f: impl FnOnce(&mut DetectionRecord)) -> Result<DetectionRecord> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(Error::UnknownDetection(id))?;
        f(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl DetectionSink for MemorySink {
    async fn create_detection(&self, new: NewDetection) -> Result<DetectionRecord> {
        self.insert(new)
    }

    async fn pending_detection_for(&self, actor: &ActorKey) -> Result<Option<DetectionRecord>> {
        Ok(self.pending_for(actor))
    }

    async fn update_detection_video(&self, id: DetectionId, path: &Path, start_ms: i64, end_ms: i64) -> Result<()> {
        self.modify(id, |r| {
            r.video_path = Some(path.to_path_buf());
            r.video_start_ms = Some(start_ms);
            r.video_end_ms = Some(end_ms);
        })?;
        Ok(())
    }

    async fn clear_detection_video(&self, id: DetectionId) -> Result<()> {
        self.modify(id, |r| {
            r.video_path = None;
            r.video_start_ms = None;
            r.video_end_ms = None;
        })?;
        Ok(())
    }

    async fn set_status(&self, id: DetectionId, status: DetectionStatus) -> Result<()> {
        self.modify(id, |r| r.status = status)?;
        Ok(())
    }
}

// ── JSONL files ───────────────────────────────────────────────────────────────

pub struct JsonlSink {
    out:   PathBuf,
    index: MemorySink,
}

impl JsonlSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out, index: MemorySink::new() })
    }

    pub fn output_dir(&self) -> &Path { &self.out }

    async fn audit(&self, op: &str, record: &DetectionRecord) -> Result<()> {
        let line = json!({ "op": op, "at": Utc::now(), "record": record });
        self.write("audit_log.jsonl", &(serde_json::to_string(&line)? + "\n")).await
    }

    async fn append_created(&self, record: &DetectionRecord) -> Result<()> {
        self.write("detections.jsonl", &(serde_json::to_string(record)? + "\n")).await?;
        self.audit("create", record).await
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true)
            .open(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl DetectionSink for JsonlSink {
    async fn create_detection(&self, new: NewDetection) -> Result<DetectionRecord> {
        let record = self.index.insert(new)?;
        // the index only keeps records that made it to disk
        if let Err(e) = self.append_created(&record).await {
            self.index.forget(record.id);
            return Err(e);
        }
        info!(
            "DETECTION id={} actor={} type={} score={:.1} level={}",
            record.id, record.actor, record.detection_type, record.score, record.level
        );
        Ok(record)
    }

    async fn pending_detection_for(&self, actor: &ActorKey) -> Result<Option<DetectionRecord>> {
        Ok(self.index.pending_for(actor))
    }

    async fn update_detection_video(&self, id: DetectionId, path: &Path, start_ms: i64, end_ms: i64) -> Result<()> {
        let record = self.index.modify(id, |r| {
            r.video_path = Some(path.to_path_buf());
            r.video_start_ms = Some(start_ms);
            r.video_end_ms = Some(end_ms);
        })?;
        self.audit("evidence", &record).await
    }

    async fn clear_detection_video(&self, id: DetectionId) -> Result<()> {
        let record = self.index.modify(id, |r| {
            r.video_path = None;
            r.video_start_ms = None;
            r.video_end_ms = None;
        })?;
        self.audit("evidence_cleared", &record).await
    }

    async fn set_status(&self, id: DetectionId, status: DetectionStatus) -> Result<()> {
        let record = self.index.modify(id, |r| r.status = status)?;
        self.audit("status", &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DetectionLevel, DetectionType};

    fn new_detection(actor: ActorKey, score: f64) -> NewDetection {
        NewDetection {
            actor,
            anon_id:        None,
            canvas_id:      0,
            x:              10,
            y:              20,
            score,
            level:          DetectionLevel::High,
            detection_type: DetectionType::BotPattern,
            details:        json!({}),
        }
    }

    #[tokio::test]
    async fn memory_sink_tracks_pending_per_actor() {
        let sink = MemorySink::new();
        let a = ActorKey::User(1);
        let first = sink.create_detection(new_detection(a.clone(), 80.0)).await.unwrap();
        let second = sink.create_detection(new_detection(a.clone(), 90.0)).await.unwrap();
        sink.create_detection(new_detection(ActorKey::User(2), 99.0)).await.unwrap();

        assert_eq!(sink.pending_detection_for(&a).await.unwrap().unwrap().id, second.id);
        sink.set_status(second.id, DetectionStatus::Dismissed).await.unwrap();
        assert_eq!(sink.pending_detection_for(&a).await.unwrap().unwrap().id, first.id);
        assert_eq!(sink.create_count(), 3);
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let sink = MemorySink::new();
        let err = sink.set_status(42, DetectionStatus::Banned).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDetection(42)));
    }

    #[tokio::test]
    async fn failing_sink_rejects_creates() {
        let sink = MemorySink::new();
        sink.fail_creates(true);
        assert!(sink.create_detection(new_detection(ActorKey::User(1), 80.0)).await.is_err());
        assert_eq!(sink.create_count(), 0);
    }

    #[tokio::test]
    async fn jsonl_sink_appends_records_and_audit_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path()).unwrap();
        let rec = sink.create_detection(new_detection(ActorKey::Ip("10.1.1.1".into()), 85.0)).await.unwrap();
        sink.update_detection_video(rec.id, Path::new("recordings/1.json"), 1_000, 9_000).await.unwrap();
        sink.clear_detection_video(rec.id).await.unwrap();

        let detections = std::fs::read_to_string(dir.path().join("detections.jsonl")).unwrap();
        assert_eq!(detections.lines().count(), 1);
        let stored: DetectionRecord = serde_json::from_str(detections.lines().next().unwrap()).unwrap();
        assert_eq!(stored.actor, ActorKey::Ip("10.1.1.1".into()));

        let audit = std::fs::read_to_string(dir.path().join("audit_log.jsonl")).unwrap();
        let ops: Vec<String> = audit.lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["op"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ops, ["create", "evidence", "evidence_cleared"]);
    }

    #[tokio::test]
    async fn failed_jsonl_write_leaves_no_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("store");
        let sink = JsonlSink::new(&out).unwrap();
        std::fs::remove_dir_all(&out).unwrap();

        let actor = ActorKey::User(5);
        assert!(sink.create_detection(new_detection(actor.clone(), 90.0)).await.is_err());
        assert!(sink.pending_detection_for(&actor).await.unwrap().is_none());
        assert_eq!(sink.index.create_count(), 0);

        // once the directory is back, the next create goes through
        std::fs::create_dir_all(&out).unwrap();
        let rec = sink.create_detection(new_detection(actor.clone(), 85.0)).await.unwrap();
        assert_eq!(sink.pending_detection_for(&actor).await.unwrap().unwrap().id, rec.id);
    }
}
