//! Application configuration management.
//!
//! Handles loading, saving, and validating blescout configuration including:
//! - Beacon family to range
//! - Discovery duplicate reporting
//! - BlueZ ranging cadence
//! - Logging level, format and directory
//!
//! Values are layered: built-in defaults, then the TOML file (if present),
//! then `BLESCOUT_*` environment variables such as
//! `BLESCOUT_SCANNER__BEACON_UUID`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "BLESCOUT";

/// Accepted values for [`LoggingConfig::level`].
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Bounds for [`ScannerConfig::ranging_interval_ms`].
pub const RANGING_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=60_000;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Path being written.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The layered sources could not be read or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanning behaviour.
    pub scanner: ScannerConfig,

    /// Logging output.
    pub logging: LoggingConfig,
}

/// Scanning configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Beacon family to range. Ranging is skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon_uuid: Option<Uuid>,

    /// Report every advertisement of a peripheral, not only the first.
    pub allow_duplicate_reports: bool,

    /// How often the BlueZ backend emits a ranging pass.
    pub ranging_interval_ms: u64,

    /// How long a beacon stays in range without a new advertisement.
    pub beacon_timeout_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            beacon_uuid: None,
            allow_duplicate_reports: true,
            ranging_interval_ms: 1_000,
            beacon_timeout_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output with span events.
    #[default]
    Pretty,
    /// Single-line output without colors.
    Compact,
    /// JSON lines to a daily-rolling file, plus compact stderr.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter when `RUST_LOG` is not set.
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Directory for JSON log files. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

impl Config {
    /// Load configuration from `path`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a parse or
    /// validation error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_layered(path)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// is missing. Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::load_layered(path.as_ref())
    }

    fn load_layered(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_error = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)?;
        Ok(())
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !RANGING_INTERVAL_RANGE_MS.contains(&self.scanner.ranging_interval_ms) {
            errors.push(ConfigError::ValidationError {
                field: "scanner.ranging_interval_ms".into(),
                message: format!(
                    "must be between {} and {}",
                    RANGING_INTERVAL_RANGE_MS.start(),
                    RANGING_INTERVAL_RANGE_MS.end()
                ),
            });
        }
        if self.scanner.beacon_timeout_ms < self.scanner.ranging_interval_ms {
            errors.push(ConfigError::ValidationError {
                field: "scanner.beacon_timeout_ms".into(),
                message: "must not be shorter than scanner.ranging_interval_ms".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            errors.push(ConfigError::ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "'{}' is not one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// `~/.config/blescout/config.toml` on Linux, the platform equivalent
/// elsewhere, or `./blescout.toml` when no home directory is known.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "blescout").map_or_else(
        || PathBuf::from("blescout.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default directory for log files.
#[must_use]
pub fn default_log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "blescout").map_or_else(
        || PathBuf::from("./logs"),
        |dirs| dirs.data_dir().join("logs"),
    )
}
