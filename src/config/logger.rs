//! Logging configuration structures and validation logic.
//!
//! These types describe how the `mosquitto-harness` binary sets up its
//! `tracing` subscriber. Broker output forwarded into the log is filtered
//! like every other event, under the `broker` target.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Available formats for console log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Top-level logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// Global log level or filter directive, e.g. `info` or
    /// `info,broker=debug`. `RUST_LOG` takes precedence when set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    /// Optional console output configuration.
    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    /// Optional systemd journald output configuration.
    #[validate(nested)]
    pub journald: Option<JournaldConfig>,
}

/// Accepts a bare level or a comma-separated list of `target=level` directives.
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = |l: &str| {
        matches!(
            l.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        )
    };
    let ok = !level.is_empty()
        && level.split(',').all(|directive| match directive.split_once('=') {
            Some((target, l)) => !target.is_empty() && valid(l),
            None => valid(directive),
        });
    if ok {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_log_level");
    err.message = Some(format!("Invalid log level: {}", level).into());
    Err(err)
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            console: Some(ConsoleConfig::default()),
            journald: None,
        }
    }
}

/// Configuration for console log output.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    /// Include the log target (module path) in output.
    pub show_target: bool,
    pub show_thread_ids: bool,
    /// Include span close events in output.
    pub show_spans: bool,
    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: true,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

/// Configuration for systemd journald output (Unix only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JournaldConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Syslog identifier for journal entries. Must be non-empty.
    #[validate(length(min = 1))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "mosquitto-harness".to_string(),
        }
    }
}
