//! JSONL outbox for the relational analytics mirror
//!
//! One JSON object per line. The mirror tails the file and applies records it has
//! not seen, keyed by `event_id`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::dialogue::DialogueEvent;
use crate::error::Result;

use super::ProjectionSink;

/// A line of the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub event_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub event: DialogueEvent,
}

/// Appends every event to a JSONL file
pub struct JsonlOutboxSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlOutboxSink {
    /// Open (or create) the outbox file for appending
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProjectionSink for JsonlOutboxSink {
    fn name(&self) -> &str {
        "jsonl-outbox"
    }

    async fn project(&self, event: &DialogueEvent) -> Result<()> {
        let record = OutboxRecord {
            event_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            event: event.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read every record of an outbox file, skipping malformed lines
pub async fn read_outbox(path: &Path) -> Result<Vec<OutboxRecord>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outbox").join("events.jsonl");

        let sink = JsonlOutboxSink::open(&path).await.unwrap();
        sink.project(&DialogueEvent::conversation_created("c1", "Intro")).await.unwrap();
        sink.project(&DialogueEvent::branch_changed("a", "b", 0.01)).await.unwrap();

        let records = read_outbox(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event.event_type_name(), "conversation_created");
        assert_ne!(records[0].event_id, records[1].event_id);
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");

        for _ in 0..2 {
            let sink = JsonlOutboxSink::open(&path).await.unwrap();
            sink.project(&DialogueEvent::utterance_deleted("u1")).await.unwrap();
        }

        assert_eq!(read_outbox(&path).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_missing_outbox() {
        let dir = TempDir::new().unwrap();
        let records = read_outbox(&dir.path().join("none.jsonl")).await.unwrap();
        assert!(records.is_empty());
    }
}
