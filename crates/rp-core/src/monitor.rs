//! Watches the external recorder's output directory for new files.
//!
//! Each new recording file is forwarded to the shared [`OffsetReconciler`]
//! with the time it was noticed. A missing or unset directory leaves the
//! monitor disabled; manual offsets keep working without it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::offset::OffsetReconciler;

/// Extensions the recorder writes, compared case-insensitively.
pub const RECORDING_EXTENSIONS: [&str; 6] = ["mp4", "m4a", "m4v", "mov", "wav", "mp3"];

pub fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext.as_str()))
}

/// Forwards the recording files created in `event`; returns how many.
pub fn handle_event(event: &Event, reconciler: &OffsetReconciler, detected_at: DateTime<Utc>) -> usize {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => return 0,
        EventKind::Create(_) => {}
        _ => return 0,
    }

    let mut forwarded = 0;
    for path in &event.paths {
        if is_recording_file(path) {
            reconciler.register_recording_event(path, detected_at);
            forwarded += 1;
        } else {
            tracing::debug!(path = %path.display(), "ignoring non-recording file");
        }
    }
    forwarded
}

/// A running (or disabled) directory watch.
pub struct RecordingMonitor {
    path: Option<PathBuf>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for RecordingMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingMonitor")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

impl RecordingMonitor {
    /// A monitor that watches nothing.
    pub const fn disabled() -> Self {
        Self {
            path: None,
            watcher: None,
        }
    }

    /// Starts watching `path` recursively.
    ///
    /// Never fails: an unset path, a missing directory or a watcher error
    /// is logged and yields a disabled monitor.
    pub fn start(path: Option<&Path>, reconciler: Arc<OffsetReconciler>) -> Self {
        let Some(path) = path else {
            tracing::info!("no recording directory configured, monitoring disabled");
            return Self::disabled();
        };
        if !path.is_dir() {
            tracing::warn!(path = %path.display(), "recording directory does not exist, monitoring disabled");
            return Self::disabled();
        }

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                handle_event(&event, &reconciler, Utc::now());
            }
            Err(e) => tracing::warn!(error = %e, "recording watcher error"),
        };
        let watcher = RecommendedWatcher::new(handler, Config::default()).and_then(|mut watcher| {
            watcher.watch(path, RecursiveMode::Recursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                tracing::info!(path = %path.display(), "monitoring recording directory");
                Self {
                    path: Some(path.to_path_buf()),
                    watcher: Some(watcher),
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to watch recording directory, monitoring disabled");
                Self::disabled()
            }
        }
    }

    pub const fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// The watched directory while active.
    pub fn watched_path(&self) -> Option<&Path> {
        self.watcher.as_ref().and(self.path.as_deref())
    }

    /// Stops watching. Dropping the monitor has the same effect.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            if let Some(path) = &self.path {
                tracing::info!(path = %path.display(), "stopped monitoring recording directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use notify::event::ModifyKind;

    use super::*;
    use crate::types::SessionKey;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap()
    }

    fn started() -> OffsetReconciler {
        let reconciler = OffsetReconciler::new();
        reconciler.start_session(SessionKey::new("G1", "S1").unwrap(), t0());
        reconciler
    }

    #[test]
    fn test_recognises_recording_extensions() {
        assert!(is_recording_file(Path::new("/zoom/a.mp4")));
        assert!(is_recording_file(Path::new("/zoom/audio.M4A")));
        assert!(is_recording_file(Path::new("/zoom/b.mov")));
        assert!(!is_recording_file(Path::new("/zoom/chat.txt")));
        assert!(!is_recording_file(Path::new("/zoom/mp4")));
    }

    #[test]
    fn test_created_recording_sets_auto_offset() {
        let reconciler = started();
        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/zoom/a.mp4"));

        let forwarded = handle_event(&event, &reconciler, t0() + chrono::Duration::seconds(4));
        assert_eq!(forwarded, 1);
        assert_eq!(reconciler.status().auto_offset_seconds, Some(4.0));
    }

    #[test]
    fn test_ignores_directories_other_kinds_and_extensions() {
        let reconciler = started();
        let events = [
            Event::new(EventKind::Create(CreateKind::Folder)).add_path(PathBuf::from("/zoom/2024-05-01 10.00.00")),
            Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from("/zoom/a.mp4")),
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/zoom/chat.txt")),
        ];

        for event in &events {
            assert_eq!(handle_event(event, &reconciler, t0()), 0);
        }
        let status = reconciler.status();
        assert_eq!(status.auto_offset_seconds, None);
        assert_eq!(status.last_recording_file, None);
    }

    #[test]
    fn test_unset_or_missing_directory_is_disabled() {
        let reconciler = Arc::new(OffsetReconciler::new());
        let monitor = RecordingMonitor::start(None, Arc::clone(&reconciler));
        assert!(!monitor.is_active());

        let temp = tempfile::tempdir().unwrap();
        let monitor = RecordingMonitor::start(Some(&temp.path().join("absent")), reconciler);
        assert!(!monitor.is_active());
        assert_eq!(monitor.watched_path(), None);
    }

    #[test]
    fn test_existing_directory_is_watched_until_stopped() {
        let temp = tempfile::tempdir().unwrap();
        let mut monitor = RecordingMonitor::start(Some(temp.path()), Arc::new(OffsetReconciler::new()));
        assert!(monitor.is_active());
        assert_eq!(monitor.watched_path(), Some(temp.path()));

        monitor.stop();
        assert!(!monitor.is_active());
    }
}
