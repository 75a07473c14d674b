//! Error type for broker lifecycle operations.
//!
//! `BrokerError` covers every way `Broker::start` and `Broker::stop` can fail.
//! The variants fall into a few categories:
//!
//! **Usage errors** (caller bugs, never retried):
//! - `AlreadyStarted`, `NotStarted`, `InvalidAuth`, `InvalidConfig`
//!
//! **Environment errors** (detected before any file is written):
//! - `ProgramNotFound`
//!
//! **Provisioning errors** (artifact generation before launch):
//! - `Provisioning`, `Certificate`
//!
//! **Runtime errors**:
//! - `Spawn`, `ReadinessTimeout`, `Cleanup`
//!
//! Nothing in this crate retries. A caller that wants another attempt builds
//! a fresh `Broker`.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Unified error type for broker lifecycle operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// `start` was called on a broker that is already running.
    #[error("Broker is already started")]
    AlreadyStarted,

    /// `stop` was called on a broker that was never started (or already stopped).
    #[error("Broker is not started")]
    NotStarted,

    /// An `auth` value other than `builtin` or `plugin` was supplied.
    #[error("Invalid auth backend '{0}', expected 'builtin' or 'plugin'")]
    InvalidAuth(String),

    /// The merged configuration failed field validation.
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    /// A required executable is not on the search path.
    ///
    /// Raised before the working directory is created, so nothing is left
    /// behind on disk.
    #[error("Required program '{program}' was not found on PATH")]
    ProgramNotFound { program: String },

    /// Writing an artifact or running the password utility failed.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Self-signed certificate generation failed.
    #[error("Certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// The broker process could not be spawned.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// No startup banner appeared before the readiness deadline.
    #[error("Broker did not report readiness within {0:?}")]
    ReadinessTimeout(Duration),

    /// The working directory could not be removed during teardown.
    #[error("Failed to remove working directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BrokerError {
    /// Returns true for errors caused by calling the API incorrectly.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            BrokerError::AlreadyStarted
                | BrokerError::NotStarted
                | BrokerError::InvalidAuth(_)
                | BrokerError::InvalidConfig(_)
        )
    }

    pub(crate) fn provisioning(context: &str, err: impl std::fmt::Display) -> Self {
        BrokerError::Provisioning(format!("{context}: {err}"))
    }
}
