use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Kinds of events recorded for a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    RunStarted,
    UnitCompleted,
    UnitCompletedWithErrors,
    UnitSkipped,
    UnitFailed,
    RunCompleted,
    RunAborted,
}

/// One JSON line of the run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub run_id: String,
    pub timestamp: String,
    pub event: JournalEvent,
    pub unit: Option<String>,
    pub rows_written: Option<u64>,
    pub rows_deleted: Option<u64>,
    pub details: Option<String>,
}

impl JournalEntry {
    pub fn new(run_id: &str, event: JournalEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event,
            unit: None,
            rows_written: None,
            rows_deleted: None,
            details: None,
        }
    }

    pub fn unit(mut self, name: &str) -> Self {
        self.unit = Some(name.to_string());
        self
    }

    pub fn rows(mut self, written: u64, deleted: u64) -> Self {
        self.rows_written = Some(written);
        self.rows_deleted = Some(deleted);
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Filter criteria for reading the journal back.
#[derive(Debug, Clone, Default)]
pub struct JournalFilter {
    pub run_id: Option<String>,
    pub event: Option<JournalEvent>,
    pub unit: Option<String>,
}

/// Append-only JSON-lines journal of migration runs.
pub struct RunJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunJournal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<(), AuditError> {
        let _guard = self.lock.lock().map_err(|e| AuditError::Lock(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    pub fn entries(&self, filter: &JournalFilter) -> Result<Vec<JournalEntry>, AuditError> {
        let _guard = self.lock.lock().map_err(|e| AuditError::Lock(e.to_string()))?;

        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Malformed lines are skipped, not fatal.
            if let Ok(entry) = serde_json::from_str::<JournalEntry>(trimmed) {
                if matches_filter(&entry, filter) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Remove entries older than `max_age_days`. Returns the number purged.
    pub fn purge_older_than(&self, max_age_days: u32) -> Result<usize, AuditError> {
        let _guard = self.lock.lock().map_err(|e| AuditError::Lock(e.to_string()))?;

        if !self.path.exists() {
            return Ok(0);
        }

        let cutoff = (Utc::now() - chrono::Duration::days(max_age_days as i64))
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut kept = Vec::new();
        let mut purged = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line.trim()) {
                Ok(entry) if entry.timestamp < cutoff => purged += 1,
                _ => kept.push(line),
            }
        }

        let mut file = fs::File::create(&self.path)?;
        for line in &kept {
            writeln!(file, "{}", line)?;
        }
        Ok(purged)
    }
}

fn matches_filter(entry: &JournalEntry, filter: &JournalFilter) -> bool {
    if let Some(ref run_id) = filter.run_id {
        if &entry.run_id != run_id {
            return false;
        }
    }
    if let Some(ref event) = filter.event {
        if &entry.event != event {
            return false;
        }
    }
    if let Some(ref unit) = filter.unit {
        if entry.unit.as_ref() != Some(unit) {
            return false;
        }
    }
    true
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Journal lock error: {0}")]
    Lock(String),
}
