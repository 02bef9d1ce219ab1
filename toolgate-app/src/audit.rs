use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use toolgate_executor::{AuditSink, ExecutionHistoryEntry};
use tracing::warn;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Appends one JSON document per finished execution.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    handled: AtomicUsize,
}

impl JsonlAuditSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            handled: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries handed over so far, written or not.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// Waits for detached writes to land before the process exits.
    pub async fn drain(&self, expected: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while self.handled() < expected {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// The write and fsync run on the blocking pool, off the async workers.
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(entry)?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AuditError> {
            let mut file = file.lock();
            writeln!(file, "{}", json)?;
            file.sync_all()?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn log(&self, entry: ExecutionHistoryEntry) {
        if let Err(e) = self.append(&entry).await {
            warn!("Failed to write audit entry for call {}: {}", entry.call_id, e);
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map, Value};
    use toolgate_executor::{ExecutionMetrics, ExecutionOutcome};

    fn entry(call_id: &str) -> ExecutionHistoryEntry {
        ExecutionHistoryEntry {
            id: format!("h-{call_id}"),
            call_id: call_id.to_string(),
            tool_name: "echo".to_string(),
            user_id: "tester".to_string(),
            parameters: Map::new(),
            outcome: ExecutionOutcome::Success { result: json!({"ok": true}) },
            metrics: ExecutionMetrics::default(),
            timestamp: Utc::now(),
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let sink = JsonlAuditSink::new(&path).unwrap();

        sink.log(entry("c1")).await;
        sink.log(entry("c2")).await;
        assert!(sink.drain(2, Duration::from_millis(10)).await);

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["callId"], "c1");
        assert_eq!(lines[1]["outcome"]["status"], "success");
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        JsonlAuditSink::new(&path).unwrap().log(entry("c1")).await;
        JsonlAuditSink::new(&path).unwrap().log(entry("c2")).await;

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_stay_line_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonlAuditSink::new(dir.path().join("audit.jsonl")).unwrap());

        let writers: Vec<_> = (0..20)
            .map(|i| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.log(entry(&format!("c{i}"))).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        assert!(sink.drain(20, Duration::from_millis(10)).await);

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let mut ids: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["callId"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }
}
