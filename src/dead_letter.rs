//! Append-only JSON-lines log of terminal status writes the store rejected.
use crate::model::{RecordId, RecordPatch};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    id: &'a RecordId,
    patch: &'a RecordPatch,
    error: &'a str,
    at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DeadLetterLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        error: &str,
        at: DateTime<Utc>,
    ) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(&DeadLetter {
            id,
            patch,
            error,
            at,
        })?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailStatus, MessagingStatus};

    #[tokio::test]
    async fn appends_one_json_line_per_entry() {
        let td = tempfile::tempdir().unwrap();
        let log = DeadLetterLog::new(td.path().join("nested").join("dead.jsonl"));
        let now = Utc::now();

        log.append(&RecordId::new("r1"), &RecordPatch::failure("boom", now), "disk full", now)
            .await
            .unwrap();
        log.append(
            &RecordId::new("r2"),
            &RecordPatch::success(EmailStatus::Success, MessagingStatus::Error, now),
            "locked",
            now,
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "r1");
        assert_eq!(lines[0]["patch"]["status"], "erro");
        assert_eq!(lines[0]["patch"]["mensagemErro"], "boom");
        assert_eq!(lines[1]["patch"]["whatsStatus"], "erro");
        assert_eq!(lines[1]["error"], "locked");
    }
}
