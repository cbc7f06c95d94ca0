//! Best-effort failure journal.
//!
//! The agent records a [`FailureRecord`] whenever a run ends in failure. Sinks
//! never return errors: a journal that cannot be written must not change the
//! outcome of the run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest tool response kept in a record.
pub const MAX_RESPONSE_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub reason: String,
    #[serde(default)]
    pub last_tool_call: Option<ToolCallRecord>,
    #[serde(default)]
    pub last_tool_response: Option<String>,
}

impl FailureRecord {
    pub fn new(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.into(),
            reason: reason.into(),
            last_tool_call: None,
            last_tool_response: None,
        }
    }

    /// Human-readable block appended to the log file.
    pub fn render(&self) -> String {
        let mut out = format!(
            "=== {} ===\nmodel: {}\nreason: {}\n",
            self.timestamp.to_rfc3339(),
            self.model,
            self.reason
        );
        if let Some(call) = &self.last_tool_call {
            out.push_str(&format!("last tool call: {} {}\n", call.tool, call.arguments));
        }
        if let Some(response) = &self.last_tool_response {
            let clipped: String = response.chars().take(MAX_RESPONSE_CHARS).collect();
            out.push_str(&format!("last tool response: {clipped}\n"));
        }
        out.push('\n');
        out
    }
}

pub trait FailureJournal: Send + Sync {
    fn record(&self, record: &FailureRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl FailureJournal for NoopJournal {
    fn record(&self, _record: &FailureRecord) {}
}

/// Keeps records in memory; handy in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl MemoryJournal {
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl FailureJournal for MemoryJournal {
    fn record(&self, record: &FailureRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Appends rendered records to a text file.
#[derive(Debug, Clone)]
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A journal file named after the current session inside `dir`.
    pub fn for_session(dir: impl AsRef<Path>) -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        Self::new(dir.as_ref().join(format!("agent-failures-{stamp}.log")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(text.as_bytes())
    }
}

impl FailureJournal for FileJournal {
    fn record(&self, record: &FailureRecord) {
        if let Err(err) = self.append(&record.render()) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to write failure journal"
            );
        }
    }
}
