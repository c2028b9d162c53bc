//! Application configuration loading, validation, and environment overrides.
//!
//! The top-level [`Config`] aggregates logging, serial link, loop timing,
//! stabilization and transport settings. Values are resolved in three
//! layers: built-in defaults, an optional TOML file, then the environment
//! variables the service has always honoured (`SERIAL_PORT`, `MQTT_BROKER`,
//! ...). The result is validated once and stays immutable afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use validator::Validate;

pub mod logger;
pub mod serial;
pub mod stability;

use self::{
    logger::LoggerConfig,
    serial::{ScheduleConfig, SerialConfig},
    stability::{StabilityConfig, StabilityMode},
};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SCALEBRIDGE_CONFIG";
/// Config file used when [`CONFIG_ENV`] is unset and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/scalebridge/config.toml";

#[doc(hidden)]
pub fn early_timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Timestamped messages printed before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// An environment variable is set but its value cannot be used.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub serial: SerialConfig,

    #[validate(nested)]
    pub schedule: ScheduleConfig,

    #[validate(nested)]
    pub stability: StabilityConfig,

    #[validate(nested)]
    pub transport: TransportConfig,

    /// Log events instead of publishing them.
    pub dry_run: bool,
}

pub type TransportConfig = scalebridge_mqtt::Config;

impl Config {
    /// Resolves the configuration from file and process environment.
    ///
    /// A missing default file is not an error: defaults plus environment
    /// overrides are a complete configuration.
    pub fn new() -> Result<Self, ConfigError> {
        let mut config = match Self::get_config_path() {
            Some(path) => Self::load(&path)?,
            None => {
                print_info!("No configuration file found, using defaults");
                Config::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    /// Priority: `SCALEBRIDGE_CONFIG`, then `/etc/scalebridge/config.toml`.
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Some(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Some(fallback.to_path_buf());
        }

        None
    }

    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.check()?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Overlays environment variables onto the current values.
    ///
    /// Unset or blank variables leave the value untouched. `lookup` is the
    /// environment source, normally `std::env::var`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(port) = get("SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(raw) = get("BAUD_RATE") {
            self.serial.baud_rate = parse_env("BAUD_RATE", raw)?;
        }

        if let Some(host) = get("MQTT_BROKER") {
            self.transport.host = host;
        }
        if let Some(raw) = get("MQTT_PORT") {
            self.transport.port = parse_env("MQTT_PORT", raw)?;
        }
        if let Some(topic) = get("TOPIC_INPUT") {
            self.transport.topic = topic;
        }

        if let Some(raw) = get("REQUIRED_STABLE") {
            self.stability.required_stable = parse_env("REQUIRED_STABLE", raw)?;
        }
        if let Some(raw) = get("STABILITY_MODE") {
            self.stability.mode = parse_env::<StabilityMode>("STABILITY_MODE", raw)?;
        }
        if let Some(raw) = get("LOCK_THRESHOLD") {
            self.stability.lock_threshold = parse_env("LOCK_THRESHOLD", raw)?;
        }
        if let Some(raw) = get("UNLOCK_THRESHOLD") {
            self.stability.unlock_threshold = parse_env("UNLOCK_THRESHOLD", raw)?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logger.level = level.to_lowercase();
        }

        Ok(())
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Env {
        var,
        reason: e.to_string(),
        value,
    })
}
