//! Centralized logging configuration and initialization manager.
//!
//! The `LoggerManager` validates logging configuration and initializes
//! the global `tracing` subscriber with appropriate layers for console
//! and/or systemd journald output.

use std::io;

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{
    fmt, fmt::format::FmtSpan, prelude::*, util::TryInitError, EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// The global subscriber could not be installed.
    #[error("Logger initialization error: {0}")]
    InitializationError(#[from] TryInitError),

    /// Validation errors from the logger configuration struct.
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically while connecting to the journald socket.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// No output layers were configured.
    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald failed while console output is enabled as well.
    #[error(
        "Failed to initialize journald logger while console logging is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        Ok(LoggerManager { config })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Installs the global `tracing` subscriber with the configured layers.
    ///
    /// Must be called once, before the broker is started.
    ///
    /// # Errors
    ///
    /// Fails if no layer is enabled, if journald cannot be reached while the
    /// console is enabled too, or if a global subscriber is already set.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(console_layer(console, self.filter()));
        }

        if let Some(journald) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match journald_layer(journald, self.filter()) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }
        tracing_subscriber::registry().with(layers).try_init()?;
        Ok(())
    }
}

/// Console layer in the configured format.
fn console_layer(config: &ConsoleConfig, filter: EnvFilter) -> BoxedLayer {
    let base = fmt::layer()
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(if config.show_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_ansi(config.ansi_colors)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    }
}

fn journald_layer(config: &JournaldConfig, filter: EnvFilter) -> Result<BoxedLayer, LoggerError> {
    let layer = tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
    Ok(layer.with_filter(filter).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = LoggerConfig {
            level: "chatty".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn no_enabled_outputs_is_an_error() {
        let mut manager = LoggerManager::new(LoggerConfig {
            console: None,
            journald: None,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(manager.init(), Err(LoggerError::NoLayersConfigured)));
    }
}
