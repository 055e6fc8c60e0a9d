//! Audit recorder: persists every (code, session-id, result) triple to the
//! configured directory so runs can be inspected later.
//!
//! Each execution produces two files, `<utc-timestamp>_<sequence>_<id>.code`
//! with the submitted source and `<same-stem>.result` with a small JSON
//! record of the outcome. The sequence is a per-process atomic counter that exists solely
//! to disambiguate timestamp collisions. Writes happen on a dedicated task
//! fed by a channel so recording never blocks an execution.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tokio::sync::mpsc;
use tokio::sync::mpsc::Sender;

use crate::interpreter::ExecutionResult;

/// Session tag used for one-shot executions.
pub const STATELESS_SESSION_ID: &str = "stateless";

const TIMESTAMP_FORMAT: &[FormatItem] =
    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second]");

#[derive(Serialize)]
struct ResultRecord<'a> {
    success: bool,
    output: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

struct AuditEntry {
    code_path: PathBuf,
    code: String,
    result_path: PathBuf,
    result_json: String,
}

#[derive(Clone)]
pub struct AuditRecorder {
    dir: PathBuf,
    tx: Sender<AuditEntry>,
    sequence: std::sync::Arc<AtomicU64>,
}

impl AuditRecorder {
    /// Create the record directory and spawn the writer task. Must be
    /// called from within a tokio runtime.
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let (tx, mut rx) = mpsc::channel::<AuditEntry>(256);
        tokio::task::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = tokio::fs::write(&entry.code_path, &entry.code).await {
                    tracing::warn!("audit writer: failed to write code file: {e}");
                }
                if let Err(e) = tokio::fs::write(&entry.result_path, &entry.result_json).await {
                    tracing::warn!("audit writer: failed to write result file: {e}");
                }
            }
        });

        Ok(Self {
            dir,
            tx,
            sequence: std::sync::Arc::new(AtomicU64::new(0)),
        })
    }

    /// Offer one execution to the recorder. Failures are logged, never
    /// propagated: auditing must not fail the execution it records.
    pub async fn record(&self, code: &str, session_id: &str, result: &ExecutionResult) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = match OffsetDateTime::now_utc().format(TIMESTAMP_FORMAT) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!("audit recorder: failed to format timestamp: {e}");
                return;
            }
        };
        let stem = format!("{timestamp}_{sequence}_{session_id}");

        let record = ResultRecord {
            success: result.success,
            output: &result.output,
            error: result.error.as_deref(),
        };
        let result_json = match serde_json::to_string_pretty(&record) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("audit recorder: failed to serialize result: {e}");
                return;
            }
        };

        let entry = AuditEntry {
            code_path: self.dir.join(format!("{stem}.code")),
            code: code.to_string(),
            result_path: self.dir.join(format!("{stem}.result")),
            result_json,
        };
        if self.tx.send(entry).await.is_err() {
            tracing::warn!("audit recorder: writer task is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::time::Duration;

    fn sample_result() -> ExecutionResult {
        ExecutionResult {
            success: true,
            output: "2\n".to_string(),
            error: None,
        }
    }

    #[tokio::test]
    async fn writes_code_and_result_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let recorder = AuditRecorder::new(dir.path().to_path_buf()).unwrap();
        recorder
            .record("1 + 1", STATELESS_SESSION_ID, &sample_result())
            .await;

        // The writer task is asynchronous; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut suffixes: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        suffixes.sort();
        assert_eq!(suffixes.len(), 2);
        assert!(suffixes[0].ends_with(".code"));
        assert!(suffixes[1].ends_with(".result"));
        assert!(suffixes[0].contains("_stateless."));

        let code_contents =
            std::fs::read_to_string(dir.path().join(&suffixes[0])).unwrap();
        assert_eq!(code_contents, "1 + 1");

        let result_json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(&suffixes[1])).unwrap())
                .unwrap();
        assert_eq!(result_json["success"], true);
        assert_eq!(result_json["output"], "2\n");
    }

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically() {
        let dir = tempfile::TempDir::new().unwrap();
        let recorder = AuditRecorder::new(dir.path().to_path_buf()).unwrap();
        for _ in 0..3 {
            recorder
                .record("x", "session-a", &sample_result())
                .await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut sequences: Vec<u64> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".code"))
            .map(|name| {
                name.split('_')
                    .nth(1)
                    .unwrap()
                    .parse::<u64>()
                    .unwrap()
            })
            .collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![0, 1, 2]);
    }
}
