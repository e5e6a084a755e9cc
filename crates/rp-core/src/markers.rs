//! Marker tables for import into an editing timeline.
//!
//! Logged rows carry control-clock timecodes. Export shifts them by the
//! applied offset into the recorder's timeline and renders a fixed
//! 15-column CSV (UTF-8 with BOM, CRLF) whose first data row summarises
//! the take.

use std::io;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::report_log::ReportRow;
use crate::timecode;
use crate::types::{AppliedOffset, OffsetSource};

/// UTF-8 byte-order mark, expected by spreadsheet and NLE importers.
pub const UTF8_BOM: &str = "\u{feff}";

pub const HEADERS: [&str; 15] = [
    "Marker Name",
    "Comment",
    "Start",
    "End",
    "Duration",
    "Category",
    "Created At",
    "Director",
    "Participants",
    "Take",
    "Group",
    "Session",
    "RecPilot Start",
    "Zoom Recording",
    "Applied Offset (s)",
];

const SUMMARY_NAME: &str = "Session Summary";
const SUMMARY_CATEGORY: &str = "SUMMARY";
const DEFAULT_MARKER_NAME: &str = "Marker";
const ZERO_DURATION: &str = "0:00:00";

/// Everything a take export needs besides the logged rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerExport {
    pub group_id: String,
    pub session_label: String,
    pub take_label: String,
    pub summary: String,
    pub director: String,
    pub participants: Vec<String>,
    pub offset: AppliedOffset,
    /// Human-readable control-clock session start.
    pub start_label: String,
    /// Human-readable recorder start.
    pub recording_label: String,
    /// `Created At` of the summary row.
    pub created_at: String,
}

/// An encoded marker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTable {
    pub bytes: Vec<u8>,
    /// Number of logged markers, excluding summary rows.
    pub row_count: usize,
}

/// A finished take listed in a whole-session summary export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinishedTake {
    pub take: String,
    pub summary: String,
    pub exported_at: Option<String>,
}

/// `RecPilot Start` / `Zoom Recording` column text; empty when unknown.
pub fn timestamp_label(timestamp: Option<DateTime<Utc>>, zone: FixedOffset) -> String {
    timestamp.map_or_else(String::new, |ts| {
        ts.with_timezone(&zone)
            .format("%Y/%m/%d %H:%M:%S%.3f")
            .to_string()
    })
}

/// `Created At` column text.
pub fn created_at_label(timestamp: DateTime<Utc>, zone: FixedOffset) -> String {
    timestamp
        .with_timezone(&zone)
        .format("%Y/%m/%d %H:%M:%S")
        .to_string()
}

/// Rows for one group/session, narrowed to `take_label` when the log tracks takes.
///
/// Logs written before take tracking carry no take on any row; every row of
/// the session is then returned whatever `take_label` says.
pub fn filter_rows<'r>(
    rows: &'r [ReportRow],
    group_id: &str,
    session_label: &str,
    take_label: &str,
) -> Vec<&'r ReportRow> {
    let take_label = take_label.trim();
    let session_rows: Vec<&ReportRow> = rows
        .iter()
        .filter(|row| row.group_id.trim() == group_id && row.session_label.trim() == session_label)
        .collect();
    let tracks_takes = session_rows.iter().any(|row| row.take_label.is_some());
    if !tracks_takes || take_label.is_empty() {
        return session_rows;
    }
    session_rows
        .into_iter()
        .filter(|row| row.take_label.as_deref().map(str::trim) == Some(take_label))
        .collect()
}

/// The summary comment, suffixed with the applied offset when one is in play.
pub fn summary_comment(summary: &str, offset: AppliedOffset) -> String {
    let text = summary.trim();
    if offset.seconds.abs() < 1e-3 && offset.source == OffsetSource::None {
        return text.to_string();
    }
    let suffix = format!("Offset {:+.3}s ({})", offset.seconds, offset.source);
    if text.is_empty() {
        suffix
    } else {
        format!("{text} / {suffix}")
    }
}

/// `+1.234` style offset column; exactly zero renders as `0.000`.
pub fn format_offset(seconds: f64) -> String {
    if seconds == 0.0 {
        "0.000".to_string()
    } else {
        format!("{seconds:+.3}")
    }
}

fn join_participants(participants: &[String]) -> String {
    participants
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders one row's marker start in the recorder timeline.
fn shifted_start(row: &ReportRow, offset_seconds: f64) -> String {
    let start = timecode::normalize(&row.timecode);
    timecode::shift_preserving_nonzero(&start, offset_seconds)
}

fn marker_name(row: &ReportRow) -> &str {
    let category = row.category.trim();
    if category.is_empty() {
        DEFAULT_MARKER_NAME
    } else {
        category
    }
}

impl MarkerExport {
    /// Trailing columns shared by every row of a table.
    fn trailing_columns(&self, take_label: &str) -> [String; 8] {
        [
            self.director.clone(),
            join_participants(&self.participants),
            take_label.to_string(),
            self.group_id.clone(),
            self.session_label.clone(),
            self.start_label.clone(),
            self.recording_label.clone(),
            format_offset(self.offset.seconds),
        ]
    }

    fn write_marker<W: io::Write>(
        &self,
        out: &mut csv::Writer<W>,
        row: &ReportRow,
        take_label: &str,
    ) -> csv::Result<()> {
        let name = marker_name(row);
        let start = shifted_start(row, self.offset.seconds);
        let mut record = vec![
            name.to_string(),
            row.content.trim().to_string(),
            start.clone(),
            start,
            ZERO_DURATION.to_string(),
            name.to_string(),
            row.timestamp.trim().to_string(),
        ];
        record.extend(self.trailing_columns(take_label));
        out.write_record(&record)
    }

    fn write_summary<W: io::Write>(
        &self,
        out: &mut csv::Writer<W>,
        name: &str,
        comment: String,
        created_at: &str,
        take_label: &str,
    ) -> csv::Result<()> {
        let mut record = vec![
            name.to_string(),
            comment,
            timecode::ZERO.to_string(),
            timecode::ZERO.to_string(),
            ZERO_DURATION.to_string(),
            SUMMARY_CATEGORY.to_string(),
            created_at.to_string(),
        ];
        record.extend(self.trailing_columns(take_label));
        out.write_record(&record)
    }

    /// Marker table for one take.
    pub fn generate(&self, rows: &[ReportRow]) -> csv::Result<MarkerTable> {
        let selected = filter_rows(rows, &self.group_id, &self.session_label, &self.take_label);

        let mut bytes = UTF8_BOM.as_bytes().to_vec();
        {
            let mut out = table_writer(&mut bytes);
            out.write_record(HEADERS)?;
            self.write_summary(
                &mut out,
                SUMMARY_NAME,
                summary_comment(&self.summary, self.offset),
                &self.created_at,
                &self.take_label,
            )?;
            for row in &selected {
                self.write_marker(&mut out, row, &self.take_label)?;
            }
            out.flush()?;
        }

        tracing::debug!(
            group = %self.group_id,
            session = %self.session_label,
            take = %self.take_label,
            rows = selected.len(),
            "generated marker table"
        );
        Ok(MarkerTable {
            bytes,
            row_count: selected.len(),
        })
    }

    /// Whole-session table: one summary row per finished take followed by
    /// every logged row of the session with a blank take column.
    ///
    /// `take_label` and `summary` of `self` are not used.
    pub fn generate_session_summary(
        &self,
        finished_takes: &[FinishedTake],
        rows: &[ReportRow],
    ) -> csv::Result<MarkerTable> {
        let selected = filter_rows(rows, &self.group_id, &self.session_label, "");

        let mut bytes = UTF8_BOM.as_bytes().to_vec();
        {
            let mut out = table_writer(&mut bytes);
            out.write_record(HEADERS)?;
            for take in finished_takes {
                let label = match take.take.trim() {
                    "" => "-",
                    label => label,
                };
                let created_at = take
                    .exported_at
                    .as_deref()
                    .map_or_else(|| self.created_at.clone(), export_time_label);
                self.write_summary(
                    &mut out,
                    &format!("Take {label} Summary"),
                    summary_comment(&take.summary, self.offset),
                    &created_at,
                    label,
                )?;
            }
            for row in &selected {
                self.write_marker(&mut out, row, "")?;
            }
            out.flush()?;
        }

        Ok(MarkerTable {
            bytes,
            row_count: selected.len(),
        })
    }
}

/// CRLF-terminated writer appending to `buf`.
pub(crate) fn table_writer(buf: &mut Vec<u8>) -> csv::Writer<&mut Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(buf)
}

/// `2024-05-01T10:00:00.123Z` → `2024-05-01 10:00:00`.
fn export_time_label(exported_at: &str) -> String {
    exported_at.chars().take(19).collect::<String>().replace('T', " ")
}
