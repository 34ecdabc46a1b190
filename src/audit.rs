//! Buffered JSONL audit sink, per `spec.md` §6: one masked request record
//! per line at `$LOG/audit.jsonl`, written on a background task so the
//! request path never blocks on disk I/O.
//!
//! Grounded in the teacher's own preference for channel-fed background
//! tasks over direct I/O on the hot path (its workflow engine's event
//! notifications are dispatched the same way: an `mpsc` sender handed to
//! callers, a single task owning the receiver and the actual side effect).

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub model_id: Option<String>,
    pub provider: Option<String>,
    pub cached: bool,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub outcome: &'static str,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Handle callers clone and send records into; dropping every clone closes
/// the channel and lets the background writer task exit.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::UnboundedSender<AuditRecord>>,
}

impl AuditSink {
    /// No-op sink, used when `$LOG` is not configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Spawns the background writer appending to `log_dir/audit.jsonl`.
    pub fn spawn(log_dir: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        let path = std::path::Path::new(log_dir).join("audit.jsonl");

        tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await;
            let mut file = match file {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to open audit log");
                    return;
                }
            };
            while let Some(record) = rx.recv().await {
                let line = match serde_json::to_string(&record) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to serialize audit record");
                        continue;
                    }
                };
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    tracing::error!(error = %e, "failed to write audit record");
                    continue;
                }
                let _ = file.write_all(b"\n").await;
            }
        });

        Self { tx: Some(tx) }
    }

    /// Best-effort: a full channel or a closed writer task never blocks or
    /// fails the request that triggered the record.
    pub fn record(&self, record: AuditRecord) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_drops_records_silently() {
        let sink = AuditSink::disabled();
        sink.record(AuditRecord {
            request_id: "r1".to_string(),
            model_id: None,
            provider: None,
            cached: false,
            cost_usd: 0.0,
            latency_ms: 0,
            outcome: "ok",
            created_at: chrono::Utc::now(),
        });
    }

    #[tokio::test]
    async fn spawned_sink_writes_jsonl_lines() {
        let dir = std::env::temp_dir().join(format!("llm-router-audit-test-{:?}", std::thread::current().id()));
        let _ = std::fs::create_dir_all(&dir);
        let sink = AuditSink::spawn(dir.to_str().unwrap());
        sink.record(AuditRecord {
            request_id: "r1".to_string(),
            model_id: Some("openai:gpt-4o-mini".to_string()),
            provider: Some("openai".to_string()),
            cached: false,
            cost_usd: 0.001,
            latency_ms: 42,
            outcome: "ok",
            created_at: chrono::Utc::now(),
        });
        drop(sink);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let content = tokio::fs::read_to_string(dir.join("audit.jsonl")).await.unwrap_or_default();
        assert!(content.contains("openai:gpt-4o-mini"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
