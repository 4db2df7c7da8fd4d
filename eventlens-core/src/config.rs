//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/eventlens/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/eventlens/` (~/.config/eventlens/)
//! - Data: `$XDG_DATA_HOME/eventlens/` (~/.local/share/eventlens/)
//! - State/Logs: `$XDG_STATE_HOME/eventlens/` (~/.local/state/eventlens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Analytics engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Minutes of inactivity that close a session
    #[serde(default = "default_inactivity_minutes")]
    pub inactivity_minutes: u32,

    /// Trailing window, in days, used by windowed sections
    #[serde(default = "default_reporting_days")]
    pub reporting_days: u32,

    /// Number of most recent weekly cohorts to report
    #[serde(default = "default_cohort_weeks")]
    pub cohort_weeks: usize,

    /// Entities kept by the content leaderboard
    #[serde(default = "default_leaderboard_limit")]
    pub leaderboard_limit: usize,

    /// Places kept by the save-through table
    #[serde(default = "default_save_through_limit")]
    pub save_through_limit: usize,

    /// Maximum churn-risk rows
    #[serde(default = "default_churn_limit")]
    pub churn_limit: usize,

    /// Example users listed by the resurrection section
    #[serde(default = "default_resurrection_examples")]
    pub resurrection_examples: usize,

    /// Maximum power-user rows
    #[serde(default = "default_power_user_limit")]
    pub power_user_limit: usize,

    /// Hours after signup that count toward activation
    #[serde(default = "default_activation_window_hours")]
    pub activation_window_hours: u32,

    /// Default timeout for a report section in milliseconds
    #[serde(default = "default_section_timeout")]
    pub section_timeout_ms: u64,

    /// Run report sections on scoped threads
    #[serde(default)]
    pub parallel: bool,

    /// Sections (or section prefixes) to skip
    #[serde(default)]
    pub disabled_sections: Vec<String>,

    /// Per-section timeout overrides
    #[serde(default)]
    pub section_timeouts: HashMap<String, u64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            inactivity_minutes: default_inactivity_minutes(),
            reporting_days: default_reporting_days(),
            cohort_weeks: default_cohort_weeks(),
            leaderboard_limit: default_leaderboard_limit(),
            save_through_limit: default_save_through_limit(),
            churn_limit: default_churn_limit(),
            resurrection_examples: default_resurrection_examples(),
            power_user_limit: default_power_user_limit(),
            activation_window_hours: default_activation_window_hours(),
            section_timeout_ms: default_section_timeout(),
            parallel: false,
            disabled_sections: vec![],
            section_timeouts: HashMap::new(),
        }
    }
}

impl AnalyticsConfig {
    /// Session inactivity threshold as a chrono duration.
    pub fn inactivity_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.inactivity_minutes))
    }

    /// Whether a section is switched off, either by name or by prefix
    /// (`"content"` disables every `content.*` section).
    pub fn is_section_disabled(&self, name: &str) -> bool {
        self.disabled_sections
            .iter()
            .any(|disabled| section_matches(name, disabled))
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.inactivity_minutes == 0 {
            return Err(Error::Config(
                "analytics.inactivity_minutes must be at least 1".to_string(),
            ));
        }
        if self.reporting_days == 0 {
            return Err(Error::Config(
                "analytics.reporting_days must be at least 1".to_string(),
            ));
        }
        if self.activation_window_hours == 0 {
            return Err(Error::Config(
                "analytics.activation_window_hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether section `name` is `pattern` or lives under the `pattern.` prefix.
pub fn section_matches(name: &str, pattern: &str) -> bool {
    name == pattern
        || name
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn default_inactivity_minutes() -> u32 {
    30
}

fn default_reporting_days() -> u32 {
    30
}

fn default_cohort_weeks() -> usize {
    8
}

fn default_leaderboard_limit() -> usize {
    15
}

fn default_save_through_limit() -> usize {
    20
}

fn default_churn_limit() -> usize {
    20
}

fn default_resurrection_examples() -> usize {
    5
}

fn default_power_user_limit() -> usize {
    20
}

fn default_activation_window_hours() -> u32 {
    24
}

fn default_section_timeout() -> u64 {
    30000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analytics.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/eventlens/config.toml` (~/.config/eventlens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("eventlens").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/eventlens/` (~/.local/share/eventlens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("eventlens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/eventlens/` (~/.local/state/eventlens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("eventlens")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/eventlens/data.db` (~/.local/share/eventlens/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }
}
