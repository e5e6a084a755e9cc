//! Core domain logic for RecPilot.
//!
//! This crate reconciles the control app's clock with an external
//! recorder's clock and exports logged markers into the recorder's timeline:
//! - Offsets: a per-session auto offset from the first recorder file, with a manual override
//! - Markers: time-shifted, timeline-importable CSV tables per take
//! - Final export: pairing uploaded recorder files with logged segments and archiving them

pub mod final_export;
pub mod inference;
pub mod markers;
pub mod monitor;
mod offset;
pub mod report_log;
pub mod timecode;
pub mod types;

pub use final_export::{
    ExportError, ExportMetadata, FinalExportOptions, FinalExportReport, ProcessedSegment,
    run_final_export,
};
pub use inference::{ExternalSession, RecordingFile, Segment};
pub use markers::{FinishedTake, MarkerExport, MarkerTable};
pub use monitor::RecordingMonitor;
pub use offset::{OffsetReconciler, OffsetStatus};
pub use report_log::{Migration, ReportLogError, ReportRow};
pub use types::{AppliedOffset, OffsetSource, SessionKey, ValidationError, sanitize_component};
