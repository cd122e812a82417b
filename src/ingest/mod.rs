//! Ingest sources for vitalwatch
//!
//! Supports multiple ingest methods, all speaking the canonical line format:
//! - HTTP API (`POST /ingest`)
//! - Batch directory of `.txt` files
//! - Live TCP line feed

pub mod file;
pub mod line;
pub mod socket;
pub mod stats;

use std::path::PathBuf;

use serde::Serialize;

use crate::storage::{PatientStore, StorageError};

pub use file::read_directory;
pub use line::{decode_line, format_line, parse_line, LineError};
pub use socket::{serve_lines, LineListener};
pub use stats::{IngestSnapshot, IngestStats};

/// A line that could not be stored
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub source: String,
    pub line_number: usize,
    pub reason: String,
    /// True when retrying the same line may succeed
    pub retryable: bool,
}

/// Outcome of feeding a batch of lines into the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: Vec<Rejection>,
}

impl IngestReport {
    /// Store one line, counting it as accepted or rejected. Blank lines are
    /// ignored.
    pub(crate) fn apply(&mut self, store: &PatientStore, source: &str, line_number: usize, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match ingest_line(store, line) {
            Ok(()) => self.accepted += 1,
            Err(e) => self.reject(source, line_number, e),
        }
    }

    /// Like [`apply`](Self::apply) for an undecoded line; bad UTF-8 only
    /// rejects that line.
    pub(crate) fn apply_raw(&mut self, store: &PatientStore, source: &str, line_number: usize, raw: &[u8]) {
        match ingest_raw_line(store, raw) {
            Ok(true) => self.accepted += 1,
            Ok(false) => {}
            Err(e) => self.reject(source, line_number, e),
        }
    }

    fn reject(&mut self, source: &str, line_number: usize, e: IngestError) {
        tracing::warn!(source, line = line_number, error = %e, "Rejected input line");
        self.rejected += 1;
        self.rejections.push(Rejection {
            source: source.to_string(),
            line_number,
            reason: e.to_string(),
            retryable: e.is_retryable(),
        });
    }

    pub fn merge(&mut self, other: IngestReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.rejections.extend(other.rejections);
    }
}

/// Parse and store one line
pub fn ingest_line(store: &PatientStore, line: &str) -> Result<(), IngestError> {
    let record = parse_line(line)?;
    store.ingest_record(record)?;
    Ok(())
}

/// Decode, parse and store one raw line. Returns `Ok(false)` for a blank line.
pub fn ingest_raw_line(store: &PatientStore, raw: &[u8]) -> Result<bool, IngestError> {
    let line = decode_line(raw)?;
    if line.trim().is_empty() {
        return Ok(false);
    }
    ingest_line(store, line)?;
    Ok(true)
}

/// Feed lines into the store. Bad lines are logged, counted and skipped;
/// blank lines are ignored.
pub fn ingest_lines<'a>(
    store: &PatientStore,
    stats: &IngestStats,
    source: &str,
    lines: impl IntoIterator<Item = &'a str>,
) -> IngestReport {
    let mut report = IngestReport::default();
    for (idx, line) in lines.into_iter().enumerate() {
        report.apply(store, source, idx + 1, line);
    }

    stats.record_accepted(report.accepted as u64);
    stats.record_rejected(report.rejected as u64);
    report
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed line: {0}")]
    Line(#[from] LineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("No input files found in '{0}'")]
    NoInputFiles(PathBuf),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
