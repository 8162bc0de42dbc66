//! Line-delimited protocol records on stdout
//!
//! The host reads one JSON object per line: any number of `progress`
//! records with non-decreasing values, then exactly one `result` record.

use crate::undo::UndoReport;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

/// Final status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Partial,
    Cancelled,
    Error,
}

/// Counters for one sort session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub processed: usize,
    pub duplicates_skipped: usize,
    pub conflicts_renamed: usize,
    pub conflicts_overwritten: usize,
    pub errors: usize,
    pub unsupported_skipped: usize,
    pub unchanged: usize,
}

impl SessionSummary {
    pub fn message(&self) -> String {
        format!(
            "Processed: {}, Duplicates: {}, Renamed: {}, Overwritten: {}, Unchanged: {}, Unsupported: {}, Errors: {}",
            self.processed,
            self.duplicates_skipped,
            self.conflicts_renamed,
            self.conflicts_overwritten,
            self.unchanged,
            self.unsupported_skipped,
            self.errors
        )
    }
}

/// The last record of every invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<UndoReport>,
}

impl ResultRecord {
    /// Result for a session that failed before doing any work
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            journal: None,
            summary: None,
            undo: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record<'a> {
    Progress { value: u8 },
    Result(&'a ResultRecord),
}

/// Writes protocol records, one per line, flushing after each
#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: W,
    last_progress: Option<u8>,
}

impl Reporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_progress: None,
        }
    }

    /// Emit `floor(done * 100 / total)`, never lower than the last value sent
    pub fn progress(&mut self, done: usize, total: usize) -> io::Result<()> {
        let value = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        let value = self.last_progress.map_or(value, |last| last.max(value));
        self.last_progress = Some(value);
        self.write(&Record::Progress { value })
    }

    /// Emit 100 unless it was already the last value sent
    pub fn complete(&mut self) -> io::Result<()> {
        if self.last_progress == Some(100) {
            return Ok(());
        }
        self.last_progress = Some(100);
        self.write(&Record::Progress { value: 100 })
    }

    pub fn result(&mut self, result: &ResultRecord) -> io::Result<()> {
        self.write(&Record::Result(result))
    }

    pub fn last_progress(&self) -> Option<u8> {
        self.last_progress
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, record: &Record<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}
