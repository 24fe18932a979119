//! Logging setup
//!
//! Console output is always on. File output, when enabled, is a rotating
//! daily log under the vault's data directory. Every component logs under
//! its own target (`cipher`, `backend::bot_channel`, `backend::webhook`,
//! `backend::validator`, `catalog`, `storage`, `service`, `bootstrap`), so
//! `RUST_LOG=service=debug,catalog=info` narrows output per component.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log files are named `discord-vault.<date>.log`
const LOG_FILE_PREFIX: &str = "discord-vault";

/// Configuration for the logging system
pub struct LogConfig {
    /// Directory holding the rotated log files
    pub log_dir: PathBuf,
    /// Whether to write a file log in addition to the console
    pub log_to_file: bool,
    /// Rotated files kept before the oldest is dropped
    pub max_files: usize,
    /// Fallback filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".discord-vault")
            .join("logs");

        Self {
            log_dir,
            log_to_file: true,
            max_files: 5,
            log_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Apply environment overrides on top of the defaults, the same
    /// variables-first way the default backend is configured:
    /// `VAULT_LOG_DIR`, `VAULT_LOG_TO_FILE` (`0`/`false`/`off` disables),
    /// and `VAULT_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("VAULT_LOG_DIR") {
            if !dir.is_empty() {
                config.log_dir = PathBuf::from(dir);
            }
        }
        if let Ok(flag) = std::env::var("VAULT_LOG_TO_FILE") {
            config.log_to_file = env_flag(&flag);
        }
        if let Ok(level) = std::env::var("VAULT_LOG_LEVEL") {
            if !level.is_empty() {
                config.log_level = level;
            }
        }
        config
    }
}

fn env_flag(value: &str) -> bool {
    !(value == "0" || value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("off"))
}

/// Install the global tracing subscriber.
///
/// Returns the file writer's flush guard when file logging is on; hold it
/// for the life of the process or the tail of the log is lost on exit.
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (file_layer, guard) = if config.log_to_file {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_dir)
            .with_context(|| format!("failed to open log file in {}", config.log_dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .compact()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!(
        target: "logging",
        to_file = config.log_to_file,
        log_dir = %config.log_dir.display(),
        "logging initialized"
    );
    Ok(guard)
}
