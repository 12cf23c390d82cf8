//! Append-only session log
//!
//! Every inbound game message is recorded raw; messages carrying a
//! `narrative` annotation get an extra human-readable line. Writes are
//! best-effort and never interrupt relaying. The file is created lazily on
//! first append and named after the session start time, so one gateway run
//! maps to exactly one log file.

use chrono::Local;
use gateway_core::narrative;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub struct SessionLog {
    dir: PathBuf,
    file_name: String,
    file: Mutex<Option<tokio::fs::File>>,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Self {
            dir: dir.into(),
            file_name: format!("session_{stamp}.log"),
            file: Mutex::new(None),
        }
    }

    /// Full path of this session's log file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Record one raw inbound message. Failures are logged and swallowed.
    pub async fn append(&self, raw: &str) {
        if let Err(e) = self.write_entry(raw).await {
            warn!("session log write failed: {}", e);
        }
    }

    async fn write_entry(&self, raw: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            tokio::fs::create_dir_all(&self.dir).await?;
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path())
                .await?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };

        let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut entry = format!("[{ts}] [RAW JSON] {raw}\n");
        if let Ok(msg) = serde_json::from_str::<Value>(raw) {
            if let Some(text) = narrative(&msg) {
                entry.push_str(&format!("[{ts}] [NARRATIVE] {text}\n"));
            }
        }

        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_created_lazily() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());
        assert!(!log.path().exists());

        log.append(r#"{"event":"Ping"}"#).await;
        assert!(log.path().exists());
    }

    #[tokio::test]
    async fn test_narrative_message_logged_with_both_lines() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());

        let raw = r#"{"event":"ShopPhase","narrative":"[Shop] Gold: 150, Available: [wolf,bat,eagle]"}"#;
        log.append(raw).await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("[RAW JSON]"));
        assert!(content.contains(raw));
        assert!(content.contains("[NARRATIVE] [Shop] Gold: 150, Available: [wolf,bat,eagle]"));
        // Exactly one raw entry for one append
        assert_eq!(content.matches("[RAW JSON]").count(), 1);
    }

    #[tokio::test]
    async fn test_plain_message_logged_raw_only() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());

        log.append(r#"{"event":"Ping"}"#).await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("Ping"));
        assert!(!content.contains("[NARRATIVE]"));
    }

    #[tokio::test]
    async fn test_appends_accumulate() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());

        log.append(r#"{"event":"AI_Wakeup","narrative":"[Shop] Available units: wolf, bat"}"#)
            .await;
        log.append(r#"{"event":"Combat","narrative":"[Combat] wolf dealt 25 damage"}"#)
            .await;

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("[NARRATIVE] [Shop] Available units: wolf, bat"));
        assert!(content.contains("[NARRATIVE] [Combat] wolf dealt 25 damage"));
        assert_eq!(content.matches("[RAW JSON]").count(), 2);
    }
}
