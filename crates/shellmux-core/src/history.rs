//! Command history sinks.

use crate::Result;
use async_trait::async_trait;
use shellmux_types::{CommandRecord, CommandSource};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Entries kept in memory; older ones stay on disk only.
const MAX_IN_MEMORY: usize = 10_000;

/// Receives completed commands.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_command(&self, target_id: &str, command: &str, source: CommandSource) -> Result<()>;
}

/// Append-only JSONL history file with a bounded in-memory index.
pub struct HistoryLog {
    entries: RwLock<VecDeque<CommandRecord>>,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl HistoryLog {
    /// Default location: `<data dir>/shellmux/history.jsonl`.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shellmux")
            .join("history.jsonl")
    }

    /// Open (or lazily create) a history file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let log = Self {
            entries: RwLock::new(VecDeque::new()),
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        };
        log.reload().await?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the newest entries from disk. Malformed lines are skipped.
    pub async fn reload(&self) -> Result<()> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = VecDeque::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CommandRecord>(line) {
                Ok(record) => push_bounded(&mut loaded, record),
                Err(e) => debug!(target: "shellmux::history", "Skipping malformed history line: {}", e),
            }
        }

        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        Ok(())
    }

    /// Most recent entries first.
    pub fn entries(&self, limit: Option<usize>) -> Vec<CommandRecord> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let newest_first = entries.iter().rev().cloned();
        match limit {
            Some(n) => newest_first.take(n).collect(),
            None => newest_first.collect(),
        }
    }

    /// Entries for one target, most recent first.
    pub fn by_target(&self, target_id: &str) -> Vec<CommandRecord> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .filter(|e| e.target_id == target_id)
            .cloned()
            .collect()
    }

    async fn append(&self, record: &CommandRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn push_bounded(entries: &mut VecDeque<CommandRecord>, record: CommandRecord) {
    if entries.len() == MAX_IN_MEMORY {
        entries.pop_front();
    }
    entries.push_back(record);
}

#[async_trait]
impl HistorySink for HistoryLog {
    async fn record_command(&self, target_id: &str, command: &str, source: CommandSource) -> Result<()> {
        let record = CommandRecord::new(target_id, command, source);
        if let Err(e) = self.append(&record).await {
            warn!(target: "shellmux::history", "Failed to append to {}: {}", self.path.display(), e);
            return Err(e);
        }
        push_bounded(
            &mut self.entries.write().unwrap_or_else(|e| e.into_inner()),
            record,
        );
        Ok(())
    }
}

/// History sink that only keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<CommandRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in the order they were received.
    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record_command(&self, target_id: &str, command: &str, source: CommandSource) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CommandRecord::new(target_id, command, source));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");

        let log = HistoryLog::open(&path).await.unwrap();
        log.record_command("srv-a", "ls", CommandSource::User).await.unwrap();
        log.record_command("srv-b", "uptime", CommandSource::Snippet).await.unwrap();
        log.record_command("srv-a", "df -h", CommandSource::User).await.unwrap();

        let reopened = HistoryLog::open(&path).await.unwrap();
        let commands: Vec<String> = reopened.entries(None).into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["df -h", "uptime", "ls"]);

        let for_a: Vec<String> = reopened.by_target("srv-a").into_iter().map(|e| e.command).collect();
        assert_eq!(for_a, vec!["df -h", "ls"]);
        assert_eq!(reopened.entries(Some(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        std::fs::write(
            &path,
            "not json\n\n{\"target_id\":\"t\",\"command\":\"ls\",\"recorded_at\":\"2024-01-01T00:00:00Z\"}\n",
        )
        .unwrap();

        let log = HistoryLog::open(&path).await.unwrap();
        let entries = log.entries(None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, CommandSource::User);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::open(dir.path().join("absent.jsonl")).await.unwrap();
        assert!(log.entries(None).is_empty());
    }

    #[tokio::test]
    async fn test_memory_index_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let lines: String = (0..MAX_IN_MEMORY + 5)
            .map(|i| {
                let record = CommandRecord::new("srv", format!("cmd {}", i), CommandSource::User);
                format!("{}\n", serde_json::to_string(&record).unwrap())
            })
            .collect();
        std::fs::write(&path, lines).unwrap();

        let log = HistoryLog::open(&path).await.unwrap();
        assert_eq!(log.entries(None).len(), MAX_IN_MEMORY);

        log.record_command("srv", "latest", CommandSource::User).await.unwrap();
        let entries = log.entries(None);
        assert_eq!(entries.len(), MAX_IN_MEMORY);
        assert_eq!(entries[0].command, "latest");
        assert_eq!(entries[MAX_IN_MEMORY - 1].command, "cmd 6");

        // the file still has everything
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.lines().count(), MAX_IN_MEMORY + 6);
    }
}
