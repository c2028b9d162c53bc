//! Logging configuration.
//!
//! Three outputs can be enabled independently: console, an append-only log
//! file, and systemd journald. At least one must end up active, otherwise
//! `LoggerManager::init` fails.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Line format for console and file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// trace, debug, info, warn or error (case-insensitive). `RUST_LOG`
    /// overrides it when set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub file: Option<FileConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,
}

pub(crate) fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some(format!("Invalid log level: {}", level).into());
            Err(err)
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            console: Some(ConsoleConfig::default()),
            file: Some(FileConfig::default()),
            journald: Some(JournaldConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Include the module path of each event.
    pub show_target: bool,
    pub show_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Append-only log file, on by default. Lines are never colored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,

    #[validate(length(min = 1, message = "Log file path must not be empty"))]
    pub path: String,

    pub format: LogFormat,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            enabled: true,
            path: "scalebridge.log".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// systemd journald output (Unix only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JournaldConfig {
    pub enabled: bool,

    #[validate(length(min = 1))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "scalebridge".to_string(),
        }
    }
}
