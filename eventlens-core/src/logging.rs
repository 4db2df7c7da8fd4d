//! Logging for eventlens
//!
//! Everything goes to a daily file under `$XDG_STATE_HOME/eventlens/`
//! (`eventlens.YYYY-MM-DD.log`); stdout stays reserved for the report.
//!
//! What gets logged, by level:
//!
//! | Level | Events |
//! |-------|--------|
//! | `info` | migrations, engine setup, one line per section run, report totals, imports |
//! | `warn` | failed or timed-out sections, failed name lookups (the report continues) |
//! | `debug` | aggregator inputs and outputs, disabled sections, per-id lookup misses |
//!
//! The level comes from `[logging] level` in the config file, unless
//! `RUST_LOG` is set.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_PREFIX: &str = "eventlens";
const LOG_SUFFIX: &str = "log";

/// Filter from `RUST_LOG`, falling back to the configured level.
///
/// A malformed configured level is a configuration error rather than a
/// silently dropped filter.
fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid logging.level '{}': {}", level, e)))
}

/// Install the file logger.
///
/// Keeps at most `max_files` daily files. The returned guard flushes
/// pending lines when dropped, so hold it for the life of the process.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = build_filter(&config.level)?;
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Route logs to the test harness output. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the background log writer alive.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// The file lines logged on `day` (UTC) end up in.
pub fn log_file_for(day: NaiveDate) -> PathBuf {
    Config::state_dir().join(format!(
        "{}.{}.{}",
        LOG_PREFIX,
        day.format("%Y-%m-%d"),
        LOG_SUFFIX
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_dated() {
        let day = NaiveDate::from_ymd_opt(2025, 7, 31).unwrap();
        let path = log_file_for(day);
        assert!(path.ends_with("eventlens/eventlens.2025-07-31.log"));
    }

    #[test]
    fn test_configured_level_is_checked() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("eventlens_core=trace,warn").is_ok());
        assert!(matches!(build_filter("eventlens=notalevel"), Err(Error::Config(_))));
    }
}
