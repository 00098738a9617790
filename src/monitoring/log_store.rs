//! Monitoring log storage
//!
//! Entries are kept in a bounded in-memory buffer and, when a directory is
//! configured, appended as JSON lines to one file per day
//! (`gateway-YYYY-MM-DD.log`).

use super::types::{LogEntry, LogFilter};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

const FILE_PREFIX: &str = "gateway-";
const FILE_SUFFIX: &str = ".log";

/// Log file name for a given day
pub fn log_file_name(date: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, date.format("%Y-%m-%d"), FILE_SUFFIX)
}

fn parse_log_file_date(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

pub struct LogStore {
    buffer: RwLock<VecDeque<LogEntry>>,
    max_entries: usize,
    directory: Option<PathBuf>,
}

impl LogStore {
    pub fn new(max_entries: usize, directory: Option<PathBuf>) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::new()),
            max_entries: max_entries.max(1),
            directory,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Create the log directory if one is configured
    pub async fn init(&self) -> Result<()> {
        if let Some(ref dir) = self.directory {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Buffer the entry and append it to the day's file.
    ///
    /// The entry is buffered even when the file write fails.
    pub async fn store(&self, entry: &LogEntry) -> Result<()> {
        {
            let mut buffer = self.buffer.write().await;
            buffer.push_back(entry.clone());
            while buffer.len() > self.max_entries {
                buffer.pop_front();
            }
        }

        let Some(ref dir) = self.directory else {
            return Ok(());
        };
        let path = dir.join(log_file_name(entry.timestamp.date_naive()));
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Matching entries in chronological order; `limit` keeps the newest
    pub async fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let buffer = self.buffer.read().await;
        let mut entries: Vec<LogEntry> = buffer
            .iter()
            .filter(|e| filter.level.map_or(true, |level| e.level >= level))
            .filter(|e| {
                filter
                    .server_name
                    .as_ref()
                    .map_or(true, |s| e.server_name.as_ref() == Some(s))
            })
            .filter(|e| filter.since.map_or(true, |since| e.timestamp >= since))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        entries
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Drop buffered entries and whole log files older than `older_than`
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut removed = {
            let mut buffer = self.buffer.write().await;
            let before = buffer.len();
            buffer.retain(|e| e.timestamp >= older_than);
            before - buffer.len()
        };

        let Some(ref dir) = self.directory else {
            return Ok(removed);
        };
        let cutoff = older_than.date_naive();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(parse_log_file_date) else {
                continue;
            };
            if date < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                debug!("Removed expired log file {:?}", entry.path());
                removed += 1;
            }
        }
        Ok(removed)
    }
}
