//! mosquitto-harness: disposable Mosquitto brokers for tests and tools
//!
//! This crate renders a complete Mosquitto configuration (listeners,
//! authentication, ACLs, TLS, persistence) from a small typed description,
//! launches the broker natively or through a container runtime, waits for its
//! startup banner, and tears everything down again, including the private
//! working directory the artifacts were written to.
//!
//! ## Modules
//!
//! * `broker`: The [`Broker`] controller plus its configuration merger,
//!   artifact renderer, password and certificate provisioning, and command
//!   line construction.
//!
//! * `core`: Runtime building blocks:
//!   - Subprocess handle with output capture and bounded termination
//!   - Shared output buffer and chunk event channel
//!   - Readiness state management and banner probe
//!
//! * `config`: Application configuration for the `mosquitto-harness`
//!   binary, loaded from TOML and validated via the `validator` crate.
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! ## Example
//!
//! ```no_run
//! use mosquitto_harness::{Broker, BrokerOverrides};
//!
//! # async fn run() -> Result<(), mosquitto_harness::BrokerError> {
//! let mut broker = Broker::launch(BrokerOverrides {
//!     native: Some(true),
//!     ..Default::default()
//! })
//! .await?;
//! println!("listening on {:?}", broker.urls());
//! broker.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod logger;

pub use broker::{
    Account, AuthBackend, Broker, BrokerConfig, BrokerError, BrokerOverrides, Listener, Protocol,
};
pub use crate::core::{output::OutputEvent, readiness::ReadinessState};
