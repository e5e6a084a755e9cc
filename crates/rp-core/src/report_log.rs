//! The append-only marker log.
//!
//! Each operator annotation during a live session is one CSV row. Logs
//! written before takes were tracked lack the `take` column; [`migrate`]
//! upgrades them once, before anything reads or appends.
//!
//! The log is shared by every handler in the process. Writers in other
//! processes are not coordinated with.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::markers::{UTF8_BOM, table_writer};

/// Column headers of the current log format.
pub const HEADERS: [&str; 7] = [
    "timestamp",
    "group",
    "session",
    "take",
    "timecode",
    "content",
    "category",
];

/// Recognised header names per column, in [`HEADERS`] order. Logs written by
/// the Japanese-locale control app use the second spelling.
const COLUMN_NAMES: [&[&str]; 7] = [
    &["timestamp", "日時"],
    &["group", "組番号"],
    &["session", "セッション"],
    &["take", "テイク"],
    &["timecode", "タイムコード"],
    &["content", "内容"],
    &["category", "カテゴリ"],
];

const TAKE_COLUMN: usize = 3;

/// Column count of logs that predate take tracking.
const LEGACY_COLUMNS: usize = 6;

/// Stored in place of a timecode the operator did not capture.
pub const MISSING_TIMECODE: &str = "--:--:--";

#[derive(Debug, Error)]
pub enum ReportLogError {
    #[error("failed to read marker log {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write marker log {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("malformed marker log {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// One logged marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// When the row was logged, as rendered by the logger.
    pub timestamp: String,
    pub group_id: String,
    pub session_label: String,
    /// `None` when the log predates take tracking.
    pub take_label: Option<String>,
    /// Raw control-clock timecode.
    pub timecode: String,
    pub content: String,
    pub category: String,
}

impl ReportRow {
    fn to_record(&self) -> [&str; 7] {
        let timecode = if self.timecode.trim().is_empty() {
            MISSING_TIMECODE
        } else {
            self.timecode.as_str()
        };
        [
            self.timestamp.as_str(),
            self.group_id.as_str(),
            self.session_label.as_str(),
            self.take_label.as_deref().unwrap_or(""),
            timecode,
            self.content.as_str(),
            self.category.as_str(),
        ]
    }
}

/// What [`migrate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// The log did not exist and was created with current headers.
    Created,
    /// The log already had a take column.
    AlreadyCurrent,
    /// Legacy rows were rewritten with an empty take.
    Upgraded { rows: usize },
}

fn read_err(path: &Path) -> impl FnOnce(io::Error) -> ReportLogError + '_ {
    move |source| ReportLogError::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn write_err(path: &Path) -> impl FnOnce(io::Error) -> ReportLogError + '_ {
    move |source| ReportLogError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> ReportLogError + '_ {
    move |source| ReportLogError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Splits log text into raw records. Short and long rows are kept as-is.
fn parse_records(text: &str) -> csv::Result<Vec<StringRecord>> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
        .into_records()
        .collect()
}

fn column_index(header: &StringRecord, column: usize) -> Option<usize> {
    header
        .iter()
        .position(|name| COLUMN_NAMES[column].contains(&name.trim()))
}

/// Whether `header` belongs to a log that already tracks takes.
fn tracks_takes(header: &StringRecord) -> bool {
    column_index(header, TAKE_COLUMN).is_some() || header.len() > LEGACY_COLUMNS
}

/// Brings the log at `path` to the current format. Idempotent.
pub fn migrate(path: &Path) -> Result<Migration, ReportLogError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut out = Vec::new();
            {
                let mut writer = table_writer(&mut out);
                writer.write_record(HEADERS).map_err(csv_err(path))?;
                writer.flush().map_err(write_err(path))?;
            }
            write_atomically(path, &out)?;
            tracing::info!(path = %path.display(), "created marker log");
            return Ok(Migration::Created);
        }
        Err(source) => return Err(read_err(path)(source)),
    };

    let mut records = parse_records(&text).map_err(csv_err(path))?.into_iter();
    let header = records.next().unwrap_or_default();
    if tracks_takes(&header) {
        return Ok(Migration::AlreadyCurrent);
    }

    let mut out = Vec::new();
    let mut rows = 0;
    {
        let mut writer = table_writer(&mut out);
        writer.write_record(HEADERS).map_err(csv_err(path))?;
        for record in records {
            writer
                .write_record(upgrade_legacy_record(&record))
                .map_err(csv_err(path))?;
            rows += 1;
        }
        writer.flush().map_err(write_err(path))?;
    }
    write_atomically(path, &out)?;
    tracing::info!(path = %path.display(), rows, "upgraded marker log with take column");
    Ok(Migration::Upgraded { rows })
}

/// Inserts an empty take after the session column.
fn upgrade_legacy_record(record: &StringRecord) -> Vec<&str> {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.len() >= LEGACY_COLUMNS {
        fields.truncate(LEGACY_COLUMNS);
        fields.insert(TAKE_COLUMN, "");
    } else {
        fields.resize(HEADERS.len(), "");
    }
    fields
}

/// Writes via a temporary sibling and renames into place.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ReportLogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err(path))?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    fs::write(&tmp_path, contents).map_err(write_err(path))?;
    fs::rename(&tmp_path, path).map_err(write_err(path))
}

/// Reads every row in log order. A missing log reads as empty.
pub fn read_rows(path: &Path) -> Result<Vec<ReportRow>, ReportLogError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(read_err(path)(source)),
    };
    rows_from_text(&text).map_err(csv_err(path))
}

/// Parses log text, mapping columns by header name.
///
/// A seven-column header with unrecognised names is read positionally.
pub fn rows_from_text(text: &str) -> csv::Result<Vec<ReportRow>> {
    let mut records = parse_records(text)?.into_iter();
    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let positional = header.len() == HEADERS.len();
    let column = |i: usize| column_index(&header, i).or_else(|| positional.then_some(i));
    let (timestamp, group, session, take, timecode, content, category) = (
        column(0),
        column(1),
        column(2),
        column(TAKE_COLUMN),
        column(4),
        column(5),
        column(6),
    );

    let rows = records
        .enumerate()
        .map(|(i, record)| {
            if record.len() != header.len() {
                tracing::debug!(
                    line = i + 2,
                    fields = record.len(),
                    expected = header.len(),
                    "marker log row has unexpected field count"
                );
            }
            let field = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default()
            };
            ReportRow {
                timestamp: field(timestamp),
                group_id: field(group),
                session_label: field(session),
                take_label: take.map(|_| field(take)),
                timecode: field(timecode),
                content: field(content),
                category: field(category),
            }
        })
        .collect();
    Ok(rows)
}

/// Appends one row to the log.
pub fn append_row(path: &Path, row: &ReportRow) -> Result<(), ReportLogError> {
    let mut line = Vec::new();
    {
        let mut writer = table_writer(&mut line);
        writer.write_record(row.to_record()).map_err(csv_err(path))?;
        writer.flush().map_err(write_err(path))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(write_err(path))?;
    file.write_all(&line).map_err(write_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(take: Option<&str>, timecode: &str) -> ReportRow {
        ReportRow {
            timestamp: "2024/05/01 10:00:00".to_string(),
            group_id: "G1".to_string(),
            session_label: "S1".to_string(),
            take_label: take.map(str::to_string),
            timecode: timecode.to_string(),
            content: "laughs, then pauses".to_string(),
            category: "Highlight".to_string(),
        }
    }

    #[test]
    fn test_migrate_creates_missing_log() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("data").join("report.csv");

        assert_eq!(migrate(&path).unwrap(), Migration::Created);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "timestamp,group,session,take,timecode,content,category\r\n"
        );
        assert_eq!(migrate(&path).unwrap(), Migration::AlreadyCurrent);
    }

    #[test]
    fn test_migrate_upgrades_legacy_rows_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        fs::write(
            &path,
            "timestamp,group,session,timecode,content,category\n\
             2024/05/01 10:00:00,G1,S1,00:01:00,hello,Note\n\
             2024/05/01 10:01:00,G1,S1\n",
        )
        .unwrap();

        assert_eq!(migrate(&path).unwrap(), Migration::Upgraded { rows: 2 });
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].take_label.as_deref(), Some(""));
        assert_eq!(rows[0].timecode, "00:01:00");
        assert_eq!(rows[0].category, "Note");
        assert_eq!(rows[1].session_label, "S1");
        assert_eq!(rows[1].timecode, "");

        let upgraded = fs::read_to_string(&path).unwrap();
        assert_eq!(migrate(&path).unwrap(), Migration::AlreadyCurrent);
        assert_eq!(fs::read_to_string(&path).unwrap(), upgraded);
    }

    #[test]
    fn test_legacy_log_reads_without_take() {
        let rows = rows_from_text(
            "timestamp,group,session,timecode,content,category\r\n\
             t,G1,S1,00:00:05,x,Note\r\n",
        )
        .unwrap();
        assert_eq!(rows[0].take_label, None);
        assert_eq!(rows[0].timecode, "00:00:05");
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_rows(&temp.path().join("absent.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_appended_rows_read_back_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        migrate(&path).unwrap();

        append_row(&path, &row(Some("1"), "00:00:05")).unwrap();
        append_row(&path, &row(Some("2"), "")).unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows, vec![row(Some("1"), "00:00:05"), row(Some("2"), MISSING_TIMECODE)]);
    }

    #[test]
    fn test_migrate_keeps_japanese_header_log_with_take() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        let text = "\u{feff}日時,組番号,セッション,テイク,タイムコード,内容,カテゴリ\r\n\
                    2024/05/01 10:00:00,G1,S1,1,00:01:00,hello,Note\r\n";
        fs::write(&path, text).unwrap();

        assert_eq!(migrate(&path).unwrap(), Migration::AlreadyCurrent);
        assert_eq!(fs::read_to_string(&path).unwrap(), text);

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_id, "G1");
        assert_eq!(rows[0].take_label.as_deref(), Some("1"));
        assert_eq!(rows[0].timecode, "00:01:00");
        assert_eq!(rows[0].content, "hello");
        assert_eq!(rows[0].category, "Note");
    }

    #[test]
    fn test_migrate_upgrades_japanese_legacy_log() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        fs::write(
            &path,
            "日時,組番号,セッション,タイムコード,内容,カテゴリ\n\
             2024/05/01 10:00:00,G1,S1,00:01:00,hello,Note\n",
        )
        .unwrap();

        assert_eq!(migrate(&path).unwrap(), Migration::Upgraded { rows: 1 });
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows[0].take_label.as_deref(), Some(""));
        assert_eq!(rows[0].timecode, "00:01:00");
        assert_eq!(rows[0].category, "Note");
    }

    #[test]
    fn test_seven_column_log_with_unknown_names_is_current() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        let text = "when,pair,part,shot,tc,text,kind\n2024/05/01 10:00:00,G1,S1,2,00:00:09,x,Note\n";
        fs::write(&path, text).unwrap();

        assert_eq!(migrate(&path).unwrap(), Migration::AlreadyCurrent);
        let rows = read_rows(&path).unwrap();
        assert_eq!(rows[0].take_label.as_deref(), Some("2"));
        assert_eq!(rows[0].timecode, "00:00:09");
        assert_eq!(rows[0].category, "Note");
    }

    #[test]
    fn test_quoted_fields_survive_append_and_read() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("report.csv");
        migrate(&path).unwrap();

        let mut quoted = row(Some("1"), "00:00:05");
        quoted.content = "she said \"again\",\nthen left".to_string();
        append_row(&path, &quoted).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with(",\"she said \"\"again\"\",\nthen left\",Highlight\r\n"));
        assert_eq!(read_rows(&path).unwrap(), vec![quoted]);
    }
}
