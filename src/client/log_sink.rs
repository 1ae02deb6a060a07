//! Pluggable request-log sinks.
//!
//! Every HTTP attempt emits one `ApiLogRecord`. Sinks must be safe under
//! concurrent appends, and a sink failure must never propagate into the
//! request path.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One request attempt, serialized as a single NDJSON line on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLogRecord {
    pub client_type: String,
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_params: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<usize>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub trait LogSink: Send + Sync {
    fn append(&self, record: &ApiLogRecord);
}

/// Sink that drops everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn append(&self, _record: &ApiLogRecord) {}
}

/// NDJSON file sink with single-backup rotation: when the file would exceed
/// `max_bytes` the current file is renamed to `<path>.1` (replacing any
/// previous backup) and a fresh file is started.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    state: Mutex<FileState>,
}

struct FileState {
    file: Option<File>,
    written: u64,
}

pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;

impl RotatingFileSink {
    pub fn new(path: impl AsRef<Path>, max_bytes: u64) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            state: Mutex::new(FileState {
                file: Some(file),
                written,
            }),
        })
    }

    fn rotate(&self, state: &mut FileState) -> std::io::Result<()> {
        state.file = None;
        let backup = self.path.with_extension(format!(
            "{}.1",
            self.path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "log".to_string())
        ));
        let _ = std::fs::remove_file(&backup);
        std::fs::rename(&self.path, &backup)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        state.file = Some(file);
        state.written = 0;
        Ok(())
    }
}

impl LogSink for RotatingFileSink {
    fn append(&self, record: &ApiLogRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(_) => return,
        };
        let mut state = self.state.lock();
        if state.written + line.len() as u64 + 1 > self.max_bytes {
            if self.rotate(&mut state).is_err() {
                return;
            }
        }
        if let Some(file) = state.file.as_mut() {
            if writeln!(file, "{}", line).is_ok() {
                state.written += line.len() as u64 + 1;
            }
        }
    }
}

/// In-memory ring of the most recent records, for the control surface.
pub struct MemoryLogSink {
    cap: usize,
    entries: Mutex<VecDeque<ApiLogRecord>>,
}

impl MemoryLogSink {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Mutex::new(VecDeque::with_capacity(cap.min(128))),
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<ApiLogRecord> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: &ApiLogRecord) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.cap {
            entries.pop_front();
        }
        entries.push_back(record.clone());
    }
}

/// Fan-out to several sinks.
pub struct MultiSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for MultiSink {
    fn append(&self, record: &ApiLogRecord) {
        for sink in &self.sinks {
            sink.append(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(endpoint: &str) -> ApiLogRecord {
        ApiLogRecord {
            client_type: "test".into(),
            endpoint: endpoint.into(),
            method: "GET".into(),
            request_params: None,
            status_code: Some(200),
            response_size: Some(10),
            duration_ms: 5,
            success: true,
            error_message: None,
            retry_count: 0,
            trace_id: "t".into(),
            source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn memory_sink_caps_entries() {
        let sink = MemoryLogSink::new(3);
        for i in 0..5 {
            sink.append(&record(&format!("/e{}", i)));
        }
        assert_eq!(sink.len(), 3);
        let recent = sink.recent(10);
        assert_eq!(recent[0].endpoint, "/e4");
        assert_eq!(recent[2].endpoint, "/e2");
    }

    #[test]
    fn file_sink_rotates_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-requests.log");
        let sink = RotatingFileSink::new(&path, 600).unwrap();
        for i in 0..20 {
            sink.append(&record(&format!("/endpoint/{}", i)));
        }
        let backup = path.with_extension("log.1");
        assert!(backup.exists(), "backup file should exist after rotation");
        assert!(std::fs::metadata(&path).unwrap().len() <= 600);
        // Every surviving line must be valid JSON.
        let body = std::fs::read_to_string(&path).unwrap();
        for line in body.lines() {
            let parsed: ApiLogRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.client_type, "test");
        }
    }
}
