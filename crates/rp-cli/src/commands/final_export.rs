//! Implementation of the `recpilot final-export` command.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use walkdir::WalkDir;

use rp_core::report_log;
use rp_core::{ExportMetadata, FinalExportOptions, RecordingFile, run_final_export};

use crate::Config;

/// Every regular file under `root`, in a stable order, relative to `root`.
fn collect_recordings(root: &Path) -> Result<Vec<RecordingFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map_or_else(|_| PathBuf::from(entry.file_name()), Path::to_path_buf);
        files.push(RecordingFile {
            relative_path,
            absolute_path: entry.into_path(),
        });
    }
    Ok(files)
}

/// Runs the export and writes the JSON report to `writer`.
pub fn run<W: Write>(writer: &mut W, config: &Config, metadata_path: &Path, recordings: &Path) -> Result<()> {
    let text = fs::read_to_string(metadata_path)
        .with_context(|| format!("failed to read {}", metadata_path.display()))?;
    let metadata: ExportMetadata = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", metadata_path.display()))?;

    let files = collect_recordings(recordings)?;
    tracing::debug!(count = files.len(), dir = %recordings.display(), "collected recordings");

    report_log::migrate(&config.report_path).context("failed to prepare marker log")?;
    let rows = report_log::read_rows(&config.report_path)?;

    let options = FinalExportOptions {
        exports_dir: config.exports_dir.clone(),
        zone: config.zone(),
        now: Utc::now(),
    };
    let report = run_final_export(&metadata, &files, &rows, &options).context("final export failed")?;

    serde_json::to_writer_pretty(&mut *writer, &report).context("failed to write report")?;
    writeln!(writer)?;
    Ok(())
}
