//! Session inference for batch final exports.
//!
//! Uploaded recorder files and logged segments share no identifier, so they
//! are matched heuristically:
//! 1. Files are grouped into recorder sessions by a `YYYY-MM-DD HH.MM.SS`
//!    token in their relative path (falling back to the top-level path
//!    component and the file's modification time)
//! 2. Sessions and segments are each sorted chronologically
//! 3. They are paired index-for-index; surplus segments reuse the last session
//! 4. Each pair's offset is recorder start minus segment start

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::offset::seconds_between;
use crate::types::{AppliedOffset, OffsetSource, sanitize_component};

/// Recorder folder names embed their start time, e.g. `2024-05-01 10.00.00 Meeting`.
static RECORDER_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(20\d{2})-(\d{2})-(\d{2})[ _](\d{2})\.(\d{2})\.(\d{2})").unwrap()
});

const AUDIO_PATH_KEYWORDS: &[&str] = &["audio", "m4a", "wav"];
const AUDIO_EXTENSIONS: &[&str] = &["wav", "m4a", "aac", "mp3"];

/// Extracts the embedded recorder start time from a path segment.
pub fn parse_recorder_timestamp(text: &str) -> Option<NaiveDateTime> {
    let caps = RECORDER_TIMESTAMP_RE.captures(text)?;
    let field = |i: usize| caps[i].parse::<u32>().ok();
    let year = i32::try_from(field(1)?).ok()?;
    NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?.and_hms_opt(field(4)?, field(5)?, field(6)?)
}

/// One uploaded recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    /// Path as uploaded, relative to the upload root.
    pub relative_path: PathBuf,
    /// Where the file can be read.
    pub absolute_path: PathBuf,
}

/// Files inferred to come from one recorder session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSession {
    pub folder_key: String,
    /// Earliest known start among the session's files.
    pub reference_timestamp: Option<DateTime<Utc>>,
    pub files: Vec<RecordingFile>,
}

/// A logged take with its control-clock start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub order: u32,
    pub take: String,
    pub start: Option<DateTime<Utc>>,
    pub note: String,
    pub summary: String,
}

/// A segment matched with the recorder session it is assumed to belong to.
#[derive(Debug, Clone)]
pub struct SegmentPairing<'a> {
    pub segment: &'a Segment,
    pub session: Option<&'a ExternalSession>,
    pub offset: AppliedOffset,
}

fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => Some(modified.into()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read modification time");
            None
        }
    }
}

/// The grouping key and start time for one file.
fn session_key_for(file: &RecordingFile, zone: FixedOffset) -> (String, Option<DateTime<Utc>>) {
    for component in file.relative_path.components() {
        let text = component.as_os_str().to_string_lossy();
        if let Some(naive) = parse_recorder_timestamp(&text) {
            let timestamp = zone
                .from_local_datetime(&naive)
                .single()
                .map(|t| t.with_timezone(&Utc));
            return (text.into_owned(), timestamp);
        }
    }

    let key = file
        .relative_path
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .or_else(|| {
            file.absolute_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    (key, file_modified(&file.absolute_path))
}

/// Groups files into recorder sessions, oldest first.
///
/// Sessions without a known start sort first; ties keep upload order.
pub fn group_sessions(files: &[RecordingFile], zone: FixedOffset) -> Vec<ExternalSession> {
    let mut sessions: Vec<ExternalSession> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for file in files {
        let (folder_key, timestamp) = session_key_for(file, zone);
        let idx = *index.entry(folder_key.clone()).or_insert_with(|| {
            sessions.push(ExternalSession {
                folder_key,
                reference_timestamp: timestamp,
                files: Vec::new(),
            });
            sessions.len() - 1
        });
        let session = &mut sessions[idx];
        if let Some(ts) = timestamp {
            if session.reference_timestamp.is_none_or(|current| ts < current) {
                session.reference_timestamp = Some(ts);
            }
        }
        session.files.push(file.clone());
    }

    sessions.sort_by_key(|s| s.reference_timestamp);
    tracing::debug!(sessions = sessions.len(), files = files.len(), "grouped recorder files");
    sessions
}

/// Pairs segments (sorted by start) with sessions (already sorted) by position.
pub fn pair_segments<'a>(
    segments: &'a [Segment],
    sessions: &'a [ExternalSession],
) -> Vec<SegmentPairing<'a>> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.start);

    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, segment)| {
            let session = sessions.get(idx).or_else(|| sessions.last());
            let offset = match (segment.start, session.and_then(|s| s.reference_timestamp)) {
                (Some(start), Some(recorded)) => {
                    AppliedOffset::new(seconds_between(start, recorded), OffsetSource::Calculated)
                }
                _ => AppliedOffset::new(0.0, OffsetSource::Default),
            };
            SegmentPairing {
                segment,
                session,
                offset,
            }
        })
        .collect()
}

/// Media kind used in placed file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Audio,
    Video,
}

impl FileKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Audio when the path mentions an audio keyword or has an audio extension.
    pub fn classify(relative_path: &Path) -> Self {
        let text = relative_path.to_string_lossy().replace('\\', "/").to_lowercase();
        if AUDIO_PATH_KEYWORDS.iter().any(|k| text.contains(k)) {
            return Self::Audio;
        }
        let ext = lowercase_extension(relative_path);
        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Audio
        } else {
            Self::Video
        }
    }
}

fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Identity of the take files are placed for.
#[derive(Debug, Clone, Copy)]
pub struct PlacementTarget<'a> {
    pub group_id: &'a str,
    pub session_label: &'a str,
    pub take_label: &'a str,
    /// Recorder start, rendered compactly as the name prefix.
    pub recorded_at: DateTime<FixedOffset>,
}

impl PlacementTarget<'_> {
    fn prefix(&self) -> String {
        format!(
            "{}_{}_{}_take{}",
            self.recorded_at.format("%Y%m%d_%H%M%S"),
            sanitize_component(self.group_id),
            sanitize_component(self.session_label),
            sanitize_component(self.take_label),
        )
    }
}

/// Deterministic destination names, in file order.
///
/// `<YYYYMMDD_HHMMSS>_<group>_<session>_take<take>_<kind><NN><.ext>`, with
/// `NN` counting from 01 per kind.
pub fn placement_names(files: &[RecordingFile], target: &PlacementTarget<'_>) -> Vec<String> {
    let prefix = target.prefix();
    let mut counters: HashMap<FileKind, u32> = HashMap::new();
    files
        .iter()
        .map(|file| {
            let kind = FileKind::classify(&file.relative_path);
            let counter = counters.entry(kind).or_insert(0);
            *counter += 1;
            let ext = lowercase_extension(&file.absolute_path);
            let ext = if ext.is_empty() { ext } else { format!(".{ext}") };
            format!("{prefix}_{}{:02}{ext}", kind.as_str(), counter)
        })
        .collect()
}

/// Copies a session's files into `take_dir` under their placement names.
pub fn place_files(
    files: &[RecordingFile],
    take_dir: &Path,
    target: &PlacementTarget<'_>,
) -> io::Result<Vec<String>> {
    fs::create_dir_all(take_dir)?;
    let names = placement_names(files, target);
    for (file, name) in files.iter().zip(&names) {
        fs::copy(&file.absolute_path, take_dir.join(name))?;
        tracing::debug!(from = %file.absolute_path.display(), to = %name, "placed recording");
    }
    Ok(names)
}
