//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Local};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory the external recorder writes into. Unset disables monitoring.
    pub recording_dir: Option<PathBuf>,

    /// Path to the marker log CSV.
    pub report_path: PathBuf,

    /// Where marker tables and final archives are written.
    pub exports_dir: PathBuf,

    /// Zone for recorder folder names and rendered labels, in minutes east
    /// of UTC. Defaults to the host's current offset.
    pub utc_offset_minutes: Option<i32>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("recording_dir", &self.recording_dir)
            .field("report_path", &self.report_path)
            .field("exports_dir", &self.exports_dir)
            .field("utc_offset_minutes", &self.utc_offset_minutes)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            recording_dir: None,
            report_path: data_dir.join("report.csv"),
            exports_dir: data_dir.join("exports"),
            utc_offset_minutes: None,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // RECPILOT_REPORT_PATH, RECPILOT_RECORDING_DIR, ...
        figment = figment.merge(Env::prefixed("RECPILOT_"));

        figment.extract()
    }

    /// The configured zone, falling back to the host's local offset.
    pub fn zone(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| *Local::now().offset())
    }
}

/// Returns the platform-specific config directory for recpilot.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("recpilot"))
}

/// Returns the platform-specific data directory for recpilot.
///
/// On Linux: `~/.local/share/recpilot`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("recpilot"))
}
