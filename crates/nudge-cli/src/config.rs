//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use nudge_core::{GuardConfig, InterventionMode};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Minutes away from work before an intervention.
    pub away_threshold_minutes: u32,

    /// `countdown` or `reminder`.
    pub intervention: InterventionMode,

    /// Length of the countdown overlay.
    pub countdown_seconds: u32,

    /// Period of the work-tab liveness check.
    pub work_tab_check_minutes: u32,

    /// Period of the away-threshold check.
    pub away_check_minutes: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let guard = GuardConfig::default();
        Self {
            database_path: data_dir.join("nudge.db"),
            away_threshold_minutes: 1,
            intervention: guard.intervention,
            countdown_seconds: guard.countdown_seconds,
            work_tab_check_minutes: guard.work_tab_check_minutes,
            away_check_minutes: guard.away_check_minutes,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (NUDGE_*)
        figment = figment.merge(Env::prefixed("NUDGE_"));

        figment.extract()
    }

    /// Controller settings derived from this configuration.
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            away_threshold_ms: i64::from(self.away_threshold_minutes.max(1)) * 60_000,
            intervention: self.intervention,
            countdown_seconds: self.countdown_seconds,
            work_tab_check_minutes: self.work_tab_check_minutes.max(1),
            away_check_minutes: self.away_check_minutes.max(1),
            ..GuardConfig::default()
        }
    }
}

/// Returns the platform-specific config directory for nudge.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("nudge"))
}

/// Returns the platform-specific data directory for nudge.
///
/// On Linux: `~/.local/share/nudge`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("nudge"))
}
