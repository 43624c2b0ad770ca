//! # Storage Module - Event and Command Logs
//!
//! File-backed sinks for what the monitor produces and what operators send:
//!
//! ```text
//! data/
//! ├── events.log     ← one JSON LogEntry per line (change events)
//! └── commands.log   ← one JSON CommandRecord per line
//! ```
//!
//! Both files are append-only JSON lines. Appends take an exclusive `fs2`
//! lock so a running `watch` and a one-shot `encode` can share a data
//! directory. Malformed lines are skipped on read.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use firewatch::storage::EventLog;
//! use firewatch::events::diff_snapshots;
//! use firewatch::protocol::{decode_frame, Snapshot};
//!
//! fn main() -> anyhow::Result<()> {
//!     let log = EventLog::open("./data")?;
//!     let snap = decode_frame(Some("40EF<STX>010001<ETX>"));
//!     let events = diff_snapshots(&Snapshot::empty(), &snap);
//!     log.append(&events, &snap)?;
//!     for entry in log.recent(100, None)? {
//!         println!("{} {} {}", entry.timestamp, entry.category, entry.details);
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::events::{ChangeEvent, ChangeKind, LogCategory};
use crate::protocol::{CommandRecord, SlaveStatus, Snapshot};

const EVENTS_FILE: &str = "events.log";
const COMMANDS_FILE: &str = "commands.log";

/// Persisted form of a change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub kind: ChangeKind,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,
    /// Slave state at the time of the event, for slave-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave: Option<SlaveStatus>,
}

impl LogEntry {
    pub fn from_event(event: &ChangeEvent, snapshot: &Snapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: event.category(),
            kind: event.kind,
            details: event.detail.clone(),
            address: event.subject_address,
            slave: event
                .subject_address
                .and_then(|a| snapshot.slave(a))
                .cloned(),
        }
    }
}

/// Entry counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub normal: usize,
    pub alarm: usize,
    pub trouble: usize,
    pub command: usize,
}

impl CategoryCounts {
    pub fn get(&self, category: LogCategory) -> usize {
        match category {
            LogCategory::Normal => self.normal,
            LogCategory::Alarm => self.alarm,
            LogCategory::Trouble => self.trouble,
            LogCategory::Command => self.command,
        }
    }

    pub fn total(&self) -> usize {
        self.normal + self.alarm + self.trouble + self.command
    }
}

/// Append-only change event log.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Open (creating the directory if needed) the event log under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", dir.display(), e))?;
        Ok(Self {
            path: dir.join(EVENTS_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a batch of events; returns the written entries.
    pub fn append(&self, events: &[ChangeEvent], snapshot: &Snapshot) -> Result<Vec<LogEntry>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<LogEntry> = events
            .iter()
            .map(|e| LogEntry::from_event(e, snapshot))
            .collect();
        let mut lines = String::new();
        for entry in &entries {
            lines.push_str(&serde_json::to_string(entry)?);
            lines.push('\n');
        }
        append_locked(&self.path, &lines)?;
        debug!("Logged {} event(s) to {}", entries.len(), self.path.display());
        Ok(entries)
    }

    /// Newest-first entries, optionally restricted to one category.
    pub fn recent(&self, limit: usize, category: Option<LogCategory>) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = read_lines(&self.path)?;
        // File order is oldest first.
        entries.reverse();
        Ok(entries
            .into_iter()
            .filter(|e| category.map_or(true, |c| e.category == c))
            .take(limit)
            .collect())
    }

    pub fn counts(&self) -> Result<CategoryCounts> {
        let entries: Vec<LogEntry> = read_lines(&self.path)?;
        let mut counts = CategoryCounts::default();
        for entry in entries {
            match entry.category {
                LogCategory::Normal => counts.normal += 1,
                LogCategory::Alarm => counts.alarm += 1,
                LogCategory::Trouble => counts.trouble += 1,
                LogCategory::Command => counts.command += 1,
            }
        }
        Ok(counts)
    }
}

/// Append-only record of commands handed to the panel.
pub struct CommandLog {
    path: PathBuf,
}

impl CommandLog {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", dir.display(), e))?;
        Ok(Self {
            path: dir.join(COMMANDS_FILE),
        })
    }

    pub fn append(&self, record: &CommandRecord) -> Result<()> {
        let line = serde_json::to_string(record)? + "\n";
        append_locked(&self.path, &line)
    }

    /// Newest-first command history.
    pub fn history(&self, limit: usize) -> Result<Vec<CommandRecord>> {
        let mut records: Vec<CommandRecord> = read_lines(&self.path)?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

/// Append `content` to `path` under an exclusive lock.
fn append_locked(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    file.lock_exclusive()?;
    let result = file.write_all(content.as_bytes()).and_then(|_| file.flush());
    let _ = FileExt::unlock(&file);
    result.map_err(|e| anyhow!("Failed to append to {}: {}", path.display(), e))
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(anyhow!("Failed reading {}: {}", path.display(), e)),
    };
    let mut out = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(v) => out.push(v),
            Err(e) => warn!(
                "Skipping malformed line {} in {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(out)
}
