//! One-shot archive of a whole multi-take session.
//!
//! Segments from the client metadata are paired with uploaded recorder files
//! (see [`crate::inference`]), each take gets a marker table, an optional note
//! and its renamed media, and the finished tree is zipped. Everything is
//! assembled in a scratch directory so a failure never leaves a partial
//! archive behind.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::inference::{self, PlacementTarget, RecordingFile, Segment, SegmentPairing};
use crate::markers::{MarkerExport, created_at_label, timestamp_label};
use crate::report_log::ReportRow;
use crate::types::{OffsetSource, SessionKey, ValidationError, sanitize_component};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no recording files were supplied")]
    NoRecordings,

    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to write archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("failed to render marker table: {0}")]
    Table(#[from] csv::Error),

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Client metadata describing the session being archived.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportMetadata {
    pub group_id: String,
    pub session: String,
    pub director: String,
    pub participants: Vec<String>,
    pub segments: Vec<SegmentInput>,
    pub takes: Vec<TakeInput>,
}

/// One logged segment as sent by the client. Fields are loosely typed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SegmentInput {
    pub id: Option<Value>,
    pub order: Option<Value>,
    pub take: Option<Value>,
    /// Control-clock start in epoch milliseconds, as a number or a string.
    pub start_timestamp: Option<Value>,
    pub note: Option<String>,
    pub summary: Option<String>,
}

/// A per-take summary used when the segment carries none.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TakeInput {
    pub take: Option<Value>,
    pub summary: Option<String>,
}

fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_order(value: Option<&Value>) -> Option<u32> {
    let order = match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    u32::try_from(order).ok().filter(|o| *o > 0)
}

/// Epoch milliseconds, as a number or numeric string, to a timestamp.
pub fn parse_epoch_millis(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !millis.is_finite() {
        return None;
    }
    #[expect(
        clippy::cast_possible_truncation,
        reason = "out-of-range values are rejected by from_timestamp_millis"
    )]
    let millis = millis.round() as i64;
    DateTime::from_timestamp_millis(millis)
}

fn trimmed(text: Option<&String>) -> String {
    text.map(|s| s.trim().to_string()).unwrap_or_default()
}

impl ExportMetadata {
    /// Normalised segments in input order.
    ///
    /// `order` defaults to the position plus one and `take` to `order`.
    pub fn segments(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                let order = value_order(input.order.as_ref())
                    .unwrap_or_else(|| u32::try_from(idx + 1).unwrap_or(u32::MAX));
                Segment {
                    id: value_text(input.id.as_ref()).unwrap_or_default(),
                    order,
                    take: value_text(input.take.as_ref()).unwrap_or_else(|| order.to_string()),
                    start: input.start_timestamp.as_ref().and_then(parse_epoch_millis),
                    note: trimmed(input.note.as_ref()),
                    summary: trimmed(input.summary.as_ref()),
                }
            })
            .collect()
    }

    fn take_summaries(&self) -> HashMap<String, String> {
        self.takes
            .iter()
            .filter_map(|t| Some((value_text(t.take.as_ref())?, trimmed(t.summary.as_ref()))))
            .collect()
    }
}

/// Where and when a final export runs.
#[derive(Debug, Clone)]
pub struct FinalExportOptions {
    pub exports_dir: PathBuf,
    /// Zone for recorder folder names and rendered labels.
    pub zone: FixedOffset,
    pub now: DateTime<Utc>,
}

/// Outcome for one exported take.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedSegment {
    pub take: String,
    /// Rounded to milliseconds.
    pub offset_seconds: f64,
    pub offset_source: OffsetSource,
    pub recpilot_start: String,
    pub zoom_start: String,
    pub rows: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalExportReport {
    pub archive_path: PathBuf,
    pub segments: Vec<ProcessedSegment>,
}

/// Shared inputs for assembling each take directory.
struct TakeAssembler<'a> {
    key: &'a SessionKey,
    metadata: &'a ExportMetadata,
    rows: &'a [ReportRow],
    summaries: HashMap<String, String>,
    options: &'a FinalExportOptions,
    created_at: String,
    root: &'a Path,
}

impl TakeAssembler<'_> {
    fn file_stem(&self, take: &str) -> String {
        format!(
            "{}_{}_take{}",
            sanitize_component(self.key.group_id.as_str()),
            sanitize_component(self.key.session_label.as_str()),
            sanitize_component(take),
        )
    }

    fn assemble(&self, pairing: &SegmentPairing<'_>) -> Result<ProcessedSegment, ExportError> {
        let segment = pairing.segment;
        let take = segment.take.as_str();
        let zone = self.options.zone;
        let recorded_at = pairing.session.and_then(|s| s.reference_timestamp);

        let summary = if segment.summary.is_empty() {
            self.summaries.get(take).cloned().unwrap_or_default()
        } else {
            segment.summary.clone()
        };
        let export = MarkerExport {
            group_id: self.key.group_id.to_string(),
            session_label: self.key.session_label.to_string(),
            take_label: take.to_string(),
            summary,
            director: self.metadata.director.trim().to_string(),
            participants: self.metadata.participants.clone(),
            offset: pairing.offset,
            start_label: timestamp_label(segment.start, zone),
            recording_label: timestamp_label(recorded_at, zone),
            created_at: self.created_at.clone(),
        };
        let table = export.generate(self.rows)?;

        let take_dir = self.root.join(format!("take{}", sanitize_component(take)));
        fs::create_dir_all(&take_dir).map_err(io_err(&take_dir))?;
        let stem = self.file_stem(take);
        let csv_path = take_dir.join(format!("{stem}.csv"));
        fs::write(&csv_path, &table.bytes).map_err(io_err(&csv_path))?;
        if !segment.note.is_empty() {
            let note_path = take_dir.join(format!("{stem}_note.txt"));
            fs::write(&note_path, &segment.note).map_err(io_err(&note_path))?;
        }

        let files = match pairing.session {
            Some(session) => {
                let target = PlacementTarget {
                    group_id: self.key.group_id.as_str(),
                    session_label: self.key.session_label.as_str(),
                    take_label: take,
                    recorded_at: recorded_at.unwrap_or(self.options.now).with_timezone(&zone),
                };
                inference::place_files(&session.files, &take_dir, &target)
                    .map_err(io_err(&take_dir))?
            }
            None => Vec::new(),
        };

        tracing::info!(
            take,
            offset_seconds = pairing.offset.seconds,
            offset_source = %pairing.offset.source,
            rows = table.row_count,
            files = files.len(),
            "assembled take"
        );
        Ok(ProcessedSegment {
            take: take.to_string(),
            offset_seconds: (pairing.offset.seconds * 1_000.0).round() / 1_000.0,
            offset_source: pairing.offset.source,
            recpilot_start: export.start_label,
            zoom_start: export.recording_label,
            rows: table.row_count,
            files,
        })
    }
}

/// Builds the session archive under `options.exports_dir`.
pub fn run_final_export(
    metadata: &ExportMetadata,
    files: &[RecordingFile],
    rows: &[ReportRow],
    options: &FinalExportOptions,
) -> Result<FinalExportReport, ExportError> {
    let key = SessionKey::new(metadata.group_id.as_str(), metadata.session.as_str())?;
    if files.is_empty() {
        return Err(ExportError::NoRecordings);
    }

    let sessions = inference::group_sessions(files, options.zone);
    let segments = metadata.segments();
    let pairings = inference::pair_segments(&segments, &sessions);
    tracing::info!(
        %key,
        recorder_sessions = sessions.len(),
        segments = segments.len(),
        "starting final export"
    );

    let exports_dir = options.exports_dir.as_path();
    fs::create_dir_all(exports_dir).map_err(io_err(exports_dir))?;
    let scratch = tempfile::Builder::new()
        .prefix(".final-export-")
        .tempdir_in(exports_dir)
        .map_err(io_err(exports_dir))?;

    let assembler = TakeAssembler {
        key: &key,
        metadata,
        rows,
        summaries: metadata.take_summaries(),
        options,
        created_at: created_at_label(options.now, options.zone),
        root: scratch.path(),
    };
    let processed = pairings
        .iter()
        .map(|pairing| assembler.assemble(pairing))
        .collect::<Result<Vec<_>, _>>()?;

    let archive_path = exports_dir.join(format!(
        "{}_{}_{}.zip",
        sanitize_component(key.group_id.as_str()),
        sanitize_component(key.session_label.as_str()),
        options.now.with_timezone(&options.zone).format("%Y%m%d_%H%M%S"),
    ));
    write_archive(scratch.path(), &archive_path)?;
    tracing::info!(archive = %archive_path.display(), takes = processed.len(), "final export written");

    Ok(FinalExportReport {
        archive_path,
        segments: processed,
    })
}

/// Zips the tree under `root` to `destination`.
///
/// The archive is written to an anonymous sibling that is removed on any
/// failure and renamed into place once complete.
fn write_archive(root: &Path, destination: &Path) -> Result<(), ExportError> {
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    let archive_err = |source: zip::result::ZipError| ExportError::Archive {
        path: destination.to_path_buf(),
        source,
    };

    let partial = tempfile::Builder::new()
        .prefix(".archive-")
        .suffix(".zip.partial")
        .tempfile_in(dir)
        .map_err(io_err(dir))?;
    let mut writer = zip::ZipWriter::new(partial.as_file());
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ExportError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options).map_err(archive_err)?;
        } else {
            writer.start_file(name, options).map_err(archive_err)?;
            let mut source = File::open(entry.path()).map_err(io_err(entry.path()))?;
            io::copy(&mut source, &mut writer).map_err(io_err(entry.path()))?;
        }
    }
    writer.finish().map_err(archive_err)?;

    partial
        .persist(destination)
        .map_err(|e| io_err(destination)(e.error))?;
    Ok(())
}
