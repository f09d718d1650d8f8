//! Session Recorder (C10): start/stop recording, append-only pack files,
//! metadata listing, and streaming export. The append path follows the
//! pack's append-only-JSONL convention (`audit.rs`'s
//! `OpenOptions::new().create(true).append(true)`), generalized from a
//! single global log to one file per recording session.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use relay_wire::{Envelope, PackMetaHeader};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::error::RelayError;
use crate::fabricator::now_ms;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub created: String,
    pub description: Option<String>,
    pub size_bytes: u64,
    pub duration_s: f64,
    pub message_count: u64,
    pub athlete_count: usize,
}

struct CacheEntry {
    size_bytes: u64,
    modified: std::time::SystemTime,
    meta: SessionMeta,
}

struct RecordingHandle {
    session_id: String,
    sender: mpsc::Sender<Envelope>,
    writer: tokio::task::JoinHandle<()>,
    started_ms: i64,
}

enum RecorderState {
    Idle,
    Recording(RecordingHandle),
}

/// Owns the IDLE/RECORDING state machine and the append-only writer task.
/// `record` is the hot-path entry point called for every outbound envelope;
/// it is a no-op unless a session is active.
pub struct Recorder {
    session_dir: PathBuf,
    queue_depth: usize,
    state: RwLock<RecorderState>,
    meta_cache: std::sync::Mutex<HashMap<String, CacheEntry>>,
}

impl Recorder {
    pub fn new(session_dir: PathBuf, queue_depth: usize) -> Self {
        Self {
            session_dir,
            queue_depth,
            state: RwLock::new(RecorderState::Idle),
            meta_cache: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn pack_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.jsonl"))
    }

    pub async fn is_recording(&self) -> bool {
        matches!(*self.state.read().await, RecorderState::Recording(_))
    }

    pub async fn current_session_id(&self) -> Option<String> {
        match &*self.state.read().await {
            RecorderState::Recording(h) => Some(h.session_id.clone()),
            RecorderState::Idle => None,
        }
    }

    /// `start(IDLE) -> RECORDING`. 409 if already recording.
    pub async fn start(
        &self,
        session_id: Option<String>,
        description: Option<String>,
    ) -> Result<String, RelayError> {
        let mut state = self.state.write().await;
        if matches!(*state, RecorderState::Recording(_)) {
            return Err(RelayError::Conflict("a session is already recording".into()));
        }

        let session_id = session_id.unwrap_or_else(|| format!("session-{}", now_ms()));
        tokio::fs::create_dir_all(&self.session_dir).await?;

        let created = chrono::Utc::now().to_rfc3339();
        let header = PackMetaHeader::new(session_id.clone(), created, description);
        let path = self.pack_path(&session_id);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let header_line = serde_json::to_string(&header)
            .map_err(|e| RelayError::Recorder(format!("failed to serialize pack header: {e}")))?;
        file.write_all(header_line.as_bytes()).await?;
        file.write_all(b"\n").await?;

        let (tx, rx) = mpsc::channel(self.queue_depth);
        let started_ms = now_ms();
        let writer = tokio::spawn(run_writer(file, rx, started_ms, session_id.clone()));

        *state = RecorderState::Recording(RecordingHandle {
            session_id: session_id.clone(),
            sender: tx,
            writer,
            started_ms,
        });

        info!(session_id, "recording started");
        Ok(session_id)
    }

    /// `stop(RECORDING) -> IDLE`. 409 if not recording. Drops the writer's
    /// sender so its channel drains and closes, then awaits the task so the
    /// file is guaranteed flushed before this returns.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let mut state = self.state.write().await;
        let handle = match std::mem::replace(&mut *state, RecorderState::Idle) {
            RecorderState::Recording(h) => h,
            RecorderState::Idle => {
                return Err(RelayError::Conflict("no session is currently recording".into()));
            }
        };
        let session_id = handle.session_id.clone();
        drop(handle.sender);
        if let Err(e) = handle.writer.await {
            warn!(session_id, error = %e, "recorder writer task join failed");
        }
        self.meta_cache.lock().unwrap().remove(&session_id);
        info!(session_id, "recording stopped");
        Ok(())
    }

    /// Hot path: enqueue one outbound envelope for the active session, if
    /// any. Never blocks; a full queue drops the envelope and bumps the
    /// writer's own overflow log (see `run_writer`).
    pub async fn record(&self, envelope: &Envelope) {
        let state = self.state.read().await;
        if let RecorderState::Recording(handle) = &*state {
            if handle.sender.try_send(envelope.clone()).is_err() {
                warn!(session_id = %handle.session_id, "recorder queue full, dropping envelope");
            }
        }
    }

    /// List packs under the session directory with cached-by-size+mtime
    /// metadata.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMeta>, RelayError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.session_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let session_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            match self.session_meta(&session_id).await {
                Ok(meta) => out.push(meta),
                Err(e) => warn!(session_id, error = %e, "skipping unreadable session pack"),
            }
        }
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(out)
    }

    /// Metadata for one pack, served from cache unless size or mtime moved.
    pub async fn session_meta(&self, session_id: &str) -> Result<SessionMeta, RelayError> {
        let path = self.pack_path(session_id);
        let fs_meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| RelayError::NotFound(format!("no session pack named '{session_id}'")))?;
        let size_bytes = fs_meta.len();
        let modified = fs_meta
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        if let Some(entry) = self.meta_cache.lock().unwrap().get(session_id) {
            if entry.size_bytes == size_bytes && entry.modified == modified {
                return Ok(entry.meta.clone());
            }
        }

        let meta = scan_pack_metadata(&path, session_id).await?;
        self.meta_cache.lock().unwrap().insert(
            session_id.to_string(),
            CacheEntry {
                size_bytes,
                modified,
                meta: meta.clone(),
            },
        );
        Ok(meta)
    }

    /// Raw envelope lines for `GET /api/sessions/{id}/messages`, in file
    /// order, header excluded.
    pub async fn open_messages(&self, session_id: &str) -> Result<BufReader<File>, RelayError> {
        let path = self.pack_path(session_id);
        let file = File::open(&path)
            .await
            .map_err(|_| RelayError::NotFound(format!("no session pack named '{session_id}'")))?;
        Ok(BufReader::new(file))
    }
}

async fn run_writer(
    mut file: File,
    mut rx: mpsc::Receiver<Envelope>,
    started_ms: i64,
    session_id: String,
) {
    while let Some(mut envelope) = rx.recv().await {
        envelope.ts_ms -= started_ms;
        let line = match serde_json::to_string(&envelope) {
            Ok(l) => l,
            Err(e) => {
                warn!(session_id, error = %e, "failed to serialize envelope for pack");
                continue;
            }
        };
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(session_id, error = %e, "pack write failed, continuing");
            continue;
        }
        if let Err(e) = file.write_all(b"\n").await {
            warn!(session_id, error = %e, "pack write failed, continuing");
        }
    }
    let _ = file.flush().await;
}

fn collect_device_ids(value: &serde_json::Value, out: &mut HashSet<u64>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(id) = map.get("device_id").and_then(|v| v.as_u64()) {
                out.insert(id);
            }
            for v in map.values() {
                collect_device_ids(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_device_ids(v, out);
            }
        }
        _ => {}
    }
}

async fn scan_pack_metadata(path: &Path, session_id: &str) -> Result<SessionMeta, RelayError> {
    let fs_meta = tokio::fs::metadata(path).await?;
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next_line()
        .await?
        .ok_or_else(|| RelayError::Recorder(format!("pack '{session_id}' is empty")))?;
    let header: PackMetaHeader = serde_json::from_str(&header_line)
        .map_err(|e| RelayError::Recorder(format!("pack '{session_id}' has a malformed header: {e}")))?;

    let mut message_count: u64 = 0;
    let mut last_ts_ms: i64 = 0;
    let mut devices = HashSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => {
                message_count += 1;
                last_ts_ms = last_ts_ms.max(envelope.ts_ms);
                collect_device_ids(&envelope.payload, &mut devices);
            }
            Err(e) => {
                warn!(session_id, error = %e, "skipping malformed pack line");
            }
        }
    }

    Ok(SessionMeta {
        session_id: session_id.to_string(),
        created: header.created,
        description: header.description,
        size_bytes: fs_meta.len(),
        duration_s: last_ts_ms as f64 / 1000.0,
        message_count,
        athlete_count: devices.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::MessageType;

    fn tmp_dir(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("relay-recorder-test-{tag}-{}", now_ms()));
        p
    }

    #[tokio::test]
    async fn start_stop_round_trip_writes_a_readable_pack() {
        let dir = tmp_dir("roundtrip");
        let recorder = Recorder::new(dir.clone(), 16);

        let session_id = recorder.start(Some("race-1".into()), None).await.unwrap();
        assert!(recorder.is_recording().await);

        let envelope = Envelope::new(
            MessageType::Heartbeat,
            1,
            now_ms(),
            Some(session_id.clone()),
            serde_json::json!({"uptime_s": 1}),
        );
        recorder.record(&envelope).await;

        recorder.stop().await.unwrap();
        assert!(!recorder.is_recording().await);

        let meta = recorder.session_meta(&session_id).await.unwrap();
        assert_eq!(meta.session_id, session_id);
        assert_eq!(meta.message_count, 1);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn starting_twice_is_a_conflict() {
        let dir = tmp_dir("double-start");
        let recorder = Recorder::new(dir.clone(), 16);
        recorder.start(Some("a".into()), None).await.unwrap();
        let err = recorder.start(Some("b".into()), None).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
        recorder.stop().await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn stopping_when_idle_is_a_conflict() {
        let dir = tmp_dir("stop-idle");
        let recorder = Recorder::new(dir, 16);
        let err = recorder.stop().await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_session_id_is_not_found() {
        let dir = tmp_dir("not-found");
        let recorder = Recorder::new(dir, 16);
        let err = recorder.session_meta("nope").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[test]
    fn collects_nested_device_ids() {
        let payload = serde_json::json!({
            "positions": [{"device_id": 1}, {"device_id": 2}],
        });
        let mut set = HashSet::new();
        collect_device_ids(&payload, &mut set);
        assert_eq!(set.len(), 2);
    }
}
