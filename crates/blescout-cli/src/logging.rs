//! Logging initialization and configuration.
//!
//! Output goes to stderr so that stdout stays free for scan results. The
//! format follows [`LogFormat`]:
//! - **Pretty**: multi-line output with span events, for development
//! - **Compact**: single-line output without colors
//! - **Json**: JSON lines to daily-rolling files plus compact stderr

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use blescout_core::{default_log_dir, LogFormat, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the configured level.
pub const LOG_LEVEL_ENV: &str = "BLESCOUT_LOG_LEVEL";

/// Static guards to keep non-blocking writers alive.
/// These must persist for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDERR_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global subscriber.
///
/// The filter comes from `RUST_LOG` if set, then `BLESCOUT_LOG_LEVEL`, then
/// `config.level`.
///
/// # Errors
///
/// Returns an error if the env filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| config.level.clone());

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    match config.format {
        LogFormat::Pretty => init_pretty(env_filter),
        LogFormat::Compact => init_compact(env_filter),
        LogFormat::Json => init_json(env_filter, &log_directory(config))?,
    }

    Ok(())
}

/// JSON lines to a rolling file, plus compact stderr.
fn init_json(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Rolling file appender - creates new file daily
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "blescout");

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stderr)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    // Store guards to prevent dropping (keeps file writer alive)
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDERR_GUARD.set(stderr_guard);

    Ok(())
}

fn init_compact(env_filter: EnvFilter) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

fn init_pretty(env_filter: EnvFilter) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

/// Directory for JSON log files: the configured one, or the platform
/// default.
#[must_use]
pub fn log_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(default_log_dir)
}
