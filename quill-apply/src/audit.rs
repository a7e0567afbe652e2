use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "apply")]
    Apply,
    #[serde(rename = "snapshot:create")]
    SnapshotCreate,
    #[serde(rename = "snapshot:restore")]
    SnapshotRestore,
    #[serde(rename = "git:stash")]
    GitStash,
    #[serde(rename = "git:restore")]
    GitRestore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(with = "time::serde::timestamp")]
    pub ts: OffsetDateTime,
    pub action: AuditAction,
    pub files: Vec<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, files: Vec<String>, ok: bool, meta: serde_json::Value) -> Self {
        Self {
            ts: OffsetDateTime::now_utc(),
            action,
            files,
            ok,
            meta,
        }
    }
}

/// Append-only JSON-lines record of apply and rollback activity. Each
/// append is flushed and synced before returning so the snapshot:create
/// event and the apply outcome survive a crash between them. Appends
/// are serialized through a single async mutex.
pub struct AuditLog {
    path: PathBuf,
    appender: tokio::sync::Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            appender: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        line.push('\n');

        let _guard = self.appender.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read back the full log. A torn final line (crash mid-append) is
    /// silently dropped; torn lines elsewhere are skipped with a
    /// warning.
    pub async fn read_events(&self) -> std::io::Result<Vec<AuditEvent>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let lines: Vec<&str> = raw.lines().collect();
        let mut events = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    if idx + 1 != lines.len() {
                        warn!("skipping malformed audit line {}: {err}", idx + 1);
                    }
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn log(temp: &TempDir) -> AuditLog {
        AuditLog::new(temp.path().join("audit.jsonl"))
    }

    #[tokio::test]
    async fn events_round_trip_in_order() {
        let temp = TempDir::new().expect("tempdir");
        let log = log(&temp);
        log.append(&AuditEvent::new(
            AuditAction::SnapshotCreate,
            vec!["a.txt".into()],
            true,
            serde_json::Value::Null,
        ))
        .await
        .expect("append");
        log.append(&AuditEvent::new(
            AuditAction::Apply,
            vec!["a.txt".into()],
            false,
            serde_json::json!({ "error_category": "write_failure" }),
        ))
        .await
        .expect("append");

        let events = log.read_events().await.expect("read");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::SnapshotCreate);
        assert_eq!(events[1].action, AuditAction::Apply);
        assert!(!events[1].ok);
        assert_eq!(events[1].meta["error_category"], "write_failure");
    }

    #[tokio::test]
    async fn torn_final_line_is_tolerated() {
        let temp = TempDir::new().expect("tempdir");
        let log = log(&temp);
        log.append(&AuditEvent::new(
            AuditAction::Apply,
            vec!["a.txt".into()],
            true,
            serde_json::Value::Null,
        ))
        .await
        .expect("append");

        // Simulate a crash mid-append.
        let mut raw = tokio::fs::read_to_string(log.path()).await.expect("read");
        raw.push_str("{\"ts\":17");
        tokio::fs::write(log.path(), raw).await.expect("write");

        let events = log.read_events().await.expect("read");
        assert_eq!(events.len(), 1);
        assert!(events[0].ok);
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let temp = TempDir::new().expect("tempdir");
        let log = log(&temp);
        assert!(log.read_events().await.expect("read").is_empty());
    }
}
