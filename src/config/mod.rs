//! Application configuration loading, validation, and management.
//!
//! This module provides the top-level `Config` structure used by the
//! `mosquitto-harness` binary. It aggregates logging settings and the broker
//! overrides, and handles loading from TOML files and validation.
//!
//! The configuration is loaded early in the application lifecycle and is
//! intended to remain immutable thereafter.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{broker::BrokerOverrides, config::logger::LoggerConfig};

pub mod logger;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MOSQUITTO_HARNESS_CONFIG";

/// Location checked when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mosquitto-harness/config.toml";

/// Current UTC time for the early-boot print macros.
#[doc(hidden)]
pub fn timestamp() -> String {
    time::format_description::parse(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z",
    )
    .ok()
    .and_then(|format| time::OffsetDateTime::now_utc().format(&format).ok())
    .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing, or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Generic configuration-related error with a descriptive message.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while accessing configuration files.
    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Logging subsystem configuration.
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Broker overrides; unset fields take the broker defaults.
    pub broker: BrokerOverrides,
}

impl Config {
    /// Constructs a new configuration by locating and loading the config file.
    ///
    /// Without any configuration file the defaults are used.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a located file cannot be read, parsed, or
    /// validated.
    pub fn new() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) => Self::load(&path),
            None => {
                print_warn!("No configuration file found, using defaults");
                Ok(Config::default())
            }
        }
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `MOSQUITTO_HARNESS_CONFIG` environment variable
    /// 2. `/etc/mosquitto-harness/config.toml`
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

    /// Loads and validates configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Propagates IO, parsing, and validation errors as `ConfigError`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        Self::parse(&config_str)
    }

    /// Parses and validates configuration text.
    pub fn parse(config_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::broker::{AuthBackend, Protocol};

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logger.level, "info");
        assert_eq!(config.broker, BrokerOverrides::default());
    }

    #[test]
    fn broker_section_becomes_overrides() {
        let config = Config::parse(
            r#"
            [logger]
            level = "debug"

            [broker]
            native = true
            auth = "builtin"
            persistence = true

            [[broker.listen]]
            protocol = "ws"
            address = "127.0.0.1"
            port = 9001
            "#,
        )
        .unwrap();

        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.broker.native, Some(true));
        assert_eq!(config.broker.auth, Some(AuthBackend::Builtin));
        let listen = config.broker.listen.unwrap();
        assert_eq!(listen[0].protocol, Protocol::Ws);
        assert_eq!(listen[0].port, 9001);
    }

    #[test]
    fn invalid_logger_level_fails_validation() {
        let err = Config::parse("[logger]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn unknown_broker_key_is_a_parse_error() {
        let err = Config::parse("[broker]\nlisteners = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\ncontainer = \"eclipse-mosquitto:2\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.broker.container.as_deref(), Some("eclipse-mosquitto:2"));

        let missing = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Config(_)));
    }
}
