//! Per-session clock offset between the control app and the external recorder.
//!
//! One [`OffsetReconciler`] is built at service start and shared (behind an
//! `Arc`) by request handlers and the recording monitor callback. Every
//! operation takes the same short-lived lock and performs no I/O while
//! holding it.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{AppliedOffset, OffsetSource, SessionKey};

/// Mutable state for the active session.
#[derive(Debug, Clone, Default)]
struct OffsetState {
    session: Option<SessionKey>,
    start_time: Option<DateTime<Utc>>,
    auto_offset: Option<f64>,
    manual_offset: Option<f64>,
    last_recording_time: Option<DateTime<Utc>>,
    last_recording_file: Option<String>,
}

impl OffsetState {
    /// Records `detected_at - start_time` unless an auto offset already exists.
    ///
    /// Returns the offset when this call set it.
    fn update_auto_offset(&mut self, detected_at: DateTime<Utc>) -> Option<f64> {
        let start_time = self.start_time?;
        if self.auto_offset.is_some() {
            return None;
        }
        let offset = seconds_between(start_time, detected_at);
        self.auto_offset = Some(offset);
        Some(offset)
    }

    fn applied(&self) -> AppliedOffset {
        match (self.manual_offset, self.auto_offset) {
            (Some(manual), _) => AppliedOffset::new(manual, OffsetSource::Manual),
            (None, Some(auto)) => AppliedOffset::new(auto, OffsetSource::Auto),
            (None, None) => AppliedOffset::new(0.0, OffsetSource::None),
        }
    }
}

/// Signed seconds from `from` to `to`, millisecond resolution.
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "session spans are far below 2^52 milliseconds"
    )]
    let seconds = (to - from).num_milliseconds() as f64 / 1_000.0;
    seconds
}

/// A consistent snapshot of the reconciler, shaped for JSON consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetStatus {
    pub group_id: Option<String>,
    pub session: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub auto_offset_seconds: Option<f64>,
    pub manual_offset_seconds: Option<f64>,
    pub effective_offset_seconds: f64,
    pub last_recording_timestamp: Option<DateTime<Utc>>,
    pub last_recording_file: Option<String>,
    pub offset_source: OffsetSource,
}

impl OffsetStatus {
    /// The effective offset and its source as a pair.
    pub const fn applied(&self) -> AppliedOffset {
        AppliedOffset::new(self.effective_offset_seconds, self.offset_source)
    }
}

/// Thread-safe owner of the active session's offset state.
#[derive(Debug, Default)]
pub struct OffsetReconciler {
    state: Mutex<OffsetState>,
}

impl OffsetReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new session, discarding any previous auto or manual offset.
    ///
    /// A recording event seen before this call is replayed immediately so
    /// that an early recorder file still yields the offset.
    pub fn start_session(&self, session: SessionKey, start_time: DateTime<Utc>) {
        tracing::info!(%session, start_time = %start_time.to_rfc3339(), "session started");
        let computed = {
            let mut state = self.state.lock();
            state.session = Some(session);
            state.start_time = Some(start_time);
            state.auto_offset = None;
            state.manual_offset = None;
            state
                .last_recording_time
                .and_then(|last| state.update_auto_offset(last))
        };
        if let Some(offset) = computed {
            tracing::info!(offset_seconds = offset, "computed auto offset from earlier recording");
        }
    }

    /// Records a recorder file appearing at `detected_at`.
    ///
    /// The last-recording fields are always overwritten; the auto offset is
    /// only set by the first event after the session start is known.
    pub fn register_recording_event(&self, path: &Path, detected_at: DateTime<Utc>) {
        let file = path.display().to_string();
        tracing::info!(path = %file, detected_at = %detected_at.to_rfc3339(), "recording file detected");
        let computed = {
            let mut state = self.state.lock();
            state.last_recording_time = Some(detected_at);
            state.last_recording_file = Some(file);
            state.update_auto_offset(detected_at)
        };
        if let Some(offset) = computed {
            tracing::info!(offset_seconds = offset, "computed auto offset");
        }
    }

    /// Sets (`Some`) or clears (`None`) the manual override.
    pub fn set_manual_offset(&self, offset_seconds: Option<f64>) {
        self.state.lock().manual_offset = offset_seconds;
        match offset_seconds {
            Some(offset) => tracing::info!(offset_seconds = offset, "manual offset set"),
            None => tracing::info!("manual offset cleared"),
        }
    }

    /// Manual offset if set, else auto offset, else zero.
    pub fn effective_offset(&self) -> f64 {
        self.state.lock().applied().seconds
    }

    pub fn status(&self) -> OffsetStatus {
        let state = self.state.lock().clone();
        let applied = state.applied();
        let (group_id, session) = state.session.map_or((None, None), |key| {
            (
                Some(String::from(key.group_id)),
                Some(String::from(key.session_label)),
            )
        });
        OffsetStatus {
            group_id,
            session,
            start_time: state.start_time,
            auto_offset_seconds: state.auto_offset,
            manual_offset_seconds: state.manual_offset,
            effective_offset_seconds: applied.seconds,
            last_recording_timestamp: state.last_recording_time,
            last_recording_file: state.last_recording_file,
            offset_source: applied.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use insta::assert_snapshot;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()
    }

    fn key() -> SessionKey {
        SessionKey::new("G1", "S1").unwrap()
    }

    #[test]
    fn test_nothing_set_means_zero_and_none() {
        let reconciler = OffsetReconciler::new();
        assert!(reconciler.effective_offset().abs() < f64::EPSILON);
        let status = reconciler.status();
        assert_eq!(status.offset_source, OffsetSource::None);
        assert_eq!(status.group_id, None);
    }

    #[test]
    fn test_first_recording_event_sets_auto_offset() {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(key(), t0());
        reconciler.register_recording_event(
            Path::new("/zoom/a.mp4"),
            t0() + Duration::milliseconds(5_200),
        );

        let status = reconciler.status();
        assert_eq!(status.auto_offset_seconds, Some(5.2));
        assert_eq!(status.offset_source, OffsetSource::Auto);
    }

    #[test]
    fn test_later_recording_events_do_not_move_auto_offset() {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(key(), t0());
        reconciler.register_recording_event(Path::new("/zoom/a.mp4"), t0() + Duration::seconds(3));
        reconciler.register_recording_event(Path::new("/zoom/b.m4a"), t0() + Duration::seconds(9));

        let status = reconciler.status();
        assert_eq!(status.auto_offset_seconds, Some(3.0));
        assert_eq!(status.last_recording_timestamp, Some(t0() + Duration::seconds(9)));
        assert_eq!(status.last_recording_file.as_deref(), Some("/zoom/b.m4a"));
    }

    #[test]
    fn test_early_recording_event_is_replayed_on_start() {
        let reconciler = OffsetReconciler::new();
        reconciler.register_recording_event(Path::new("/zoom/a.mp4"), t0() + Duration::seconds(2));
        assert_eq!(reconciler.status().auto_offset_seconds, None);

        reconciler.start_session(key(), t0());
        assert_eq!(reconciler.status().auto_offset_seconds, Some(2.0));
    }

    #[test]
    fn test_recording_before_start_yields_negative_offset() {
        let reconciler = OffsetReconciler::new();
        reconciler.register_recording_event(Path::new("/zoom/a.mp4"), t0() - Duration::seconds(4));
        reconciler.start_session(key(), t0());
        assert_eq!(reconciler.status().auto_offset_seconds, Some(-4.0));
    }

    #[test]
    fn test_manual_offset_wins_and_clearing_reverts() {
        let reconciler = OffsetReconciler::new();
        reconciler.set_manual_offset(Some(-1.0));
        reconciler.start_session(key(), t0());
        // start_session resets the manual override
        assert_eq!(reconciler.status().offset_source, OffsetSource::None);

        reconciler.register_recording_event(
            Path::new("/zoom/a.mp4"),
            t0() + Duration::milliseconds(5_200),
        );
        reconciler.set_manual_offset(Some(-1.0));
        assert!((reconciler.effective_offset() + 1.0).abs() < f64::EPSILON);
        assert_eq!(reconciler.status().offset_source, OffsetSource::Manual);

        reconciler.set_manual_offset(None);
        assert!((reconciler.effective_offset() - 5.2).abs() < f64::EPSILON);
        assert_eq!(reconciler.status().offset_source, OffsetSource::Auto);
    }

    #[test]
    fn test_clearing_manual_without_auto_reverts_to_zero() {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(key(), t0());
        reconciler.set_manual_offset(Some(12.5));
        reconciler.set_manual_offset(None);
        assert!(reconciler.effective_offset().abs() < f64::EPSILON);
        assert_eq!(reconciler.status().offset_source, OffsetSource::None);
    }

    #[test]
    fn test_new_session_resets_offsets_but_keeps_last_recording() {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(key(), t0());
        reconciler.register_recording_event(Path::new("/zoom/a.mp4"), t0() + Duration::seconds(3));

        let next_start = t0() + Duration::seconds(60);
        reconciler.start_session(SessionKey::new("G1", "S2").unwrap(), next_start);

        let status = reconciler.status();
        assert_eq!(status.session.as_deref(), Some("S2"));
        // the stored event is replayed against the new start
        assert_eq!(status.auto_offset_seconds, Some(-57.0));
        assert_eq!(status.manual_offset_seconds, None);
    }

    #[test]
    fn test_concurrent_events_set_auto_offset_once() {
        let reconciler = Arc::new(OffsetReconciler::new());
        reconciler.start_session(key(), t0());

        let handles: Vec<_> = (1..=8)
            .map(|i| {
                let reconciler = Arc::clone(&reconciler);
                std::thread::spawn(move || {
                    let path = format!("/zoom/{i}.mp4");
                    reconciler.register_recording_event(
                        Path::new(&path),
                        t0() + Duration::seconds(i),
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let status = reconciler.status();
        let auto = status.auto_offset_seconds.unwrap();
        assert!((1.0..=8.0).contains(&auto));
        assert!(auto.fract().abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(key(), t0());
        reconciler.register_recording_event(
            Path::new("/zoom/a.mp4"),
            t0() + Duration::milliseconds(5_200),
        );
        reconciler.set_manual_offset(Some(-1.0));

        let json = serde_json::to_string_pretty(&reconciler.status()).unwrap();
        assert_snapshot!(json, @r#"
        {
          "groupId": "G1",
          "session": "S1",
          "startTime": "2024-05-01T01:00:00Z",
          "autoOffsetSeconds": 5.2,
          "manualOffsetSeconds": -1.0,
          "effectiveOffsetSeconds": -1.0,
          "lastRecordingTimestamp": "2024-05-01T01:00:05.200Z",
          "lastRecordingFile": "/zoom/a.mp4",
          "offsetSource": "manual"
        }
        "#);
    }
}
