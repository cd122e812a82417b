//! Batch import from a directory of text files

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::{IngestError, IngestReport, IngestStats};
use crate::storage::PatientStore;

/// Load every `*.txt` file in `dir`, in file name order.
///
/// Each file is streamed line by line; a bad line is skipped without
/// affecting the rest of the file.
pub fn read_directory(
    store: &PatientStore,
    stats: &IngestStats,
    dir: impl AsRef<Path>,
) -> Result<IngestReport, IngestError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(IngestError::NotADirectory(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(IngestError::NoInputFiles(dir.to_path_buf()));
    }

    let mut report = IngestReport::default();
    for path in &files {
        let file_report = read_file(store, stats, path)?;
        tracing::info!(
            file = %path.display(),
            accepted = file_report.accepted,
            rejected = file_report.rejected,
            "Imported file"
        );
        report.merge(file_report);
    }

    Ok(report)
}

/// Load one file of canonical lines
pub fn read_file(
    store: &PatientStore,
    stats: &IngestStats,
    path: &Path,
) -> Result<IngestReport, IngestError> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let source = path.display().to_string();
    let mut report = IngestReport::default();
    let mut buf = Vec::new();
    let mut line_number = 0;

    while reader.read_until(b'\n', &mut buf)? > 0 {
        line_number += 1;
        report.apply_raw(store, &source, line_number, &buf);
        buf.clear();
    }

    stats.record_accepted(report.accepted as u64);
    stats.record_rejected(report.rejected as u64);
    Ok(report)
}
