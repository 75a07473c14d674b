//! Disposable Mosquitto broker controller.
//!
//! A [`Broker`] owns one broker instance from configuration to teardown:
//!
//! 1. overrides are merged into a [`BrokerConfig`] at construction,
//! 2. `start` resolves the needed programs, renders every artifact into a
//!    fresh private working directory, launches the broker and waits for its
//!    startup banner,
//! 3. `stop` terminates the process and removes the working directory.
//!
//! Output captured from the broker stays available through [`Broker::logs`]
//! after it stopped.

mod error;
pub mod launch;
pub mod options;
pub mod passwd;
pub mod render;
pub mod tls;

use std::path::Path;

use tempfile::TempDir;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use validator::Validate;

pub use error::BrokerError;
pub use options::{Account, AuthBackend, BrokerConfig, BrokerOverrides, Listener, Protocol};

use self::launch::Toolchain;
use self::render::Layout;
use crate::core::{
    output::{OutputBuffer, OutputEvent},
    process::BrokerProcess,
    readiness::{Readiness, ReadinessProbe, ReadinessState},
};

const WORKDIR_PREFIX: &str = "mosquitto-harness-";

/// Lifecycle controller for a single broker instance.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    started: bool,
    workdir: Option<TempDir>,
    process: Option<BrokerProcess>,
    output: OutputBuffer,
    readiness: Readiness,
}

impl Broker {
    /// Creates a stopped broker from caller overrides.
    pub fn new(overrides: BrokerOverrides) -> Self {
        Self::with_config(BrokerConfig::merge(overrides))
    }

    /// Creates a stopped broker from an already resolved configuration.
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            config,
            started: false,
            workdir: None,
            process: None,
            output: OutputBuffer::default(),
            readiness: Readiness::new(),
        }
    }

    /// Constructs a broker and starts it.
    pub async fn launch(overrides: BrokerOverrides) -> Result<Self, BrokerError> {
        let mut broker = Self::new(overrides);
        broker.start().await?;
        Ok(broker)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Working directory of the running broker.
    pub fn working_dir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    /// Process id of the broker (or of the container runtime client).
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(BrokerProcess::id)
    }

    /// Everything the broker wrote to stdout and stderr so far.
    pub fn logs(&self) -> String {
        self.output.text()
    }

    /// Receives output chunks appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.output.subscribe()
    }

    pub fn readiness(&self) -> watch::Receiver<ReadinessState> {
        self.readiness.subscribe()
    }

    /// Client URLs of the configured listeners.
    pub fn urls(&self) -> Vec<String> {
        self.config.listen.iter().map(Listener::url).collect()
    }

    /// Provisions and launches the broker, returning once it reports ready.
    ///
    /// On any failure after the working directory was created, the process
    /// (if spawned) is terminated and the directory removed before the error
    /// is returned, leaving the broker stopped.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.started {
            return Err(BrokerError::AlreadyStarted);
        }
        self.config.validate()?;
        let toolchain = Toolchain::resolve(&self.config)?;

        let workdir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir()
            .map_err(|e| BrokerError::provisioning("create working directory", e))?;
        debug!("Created working directory {}", workdir.path().display());

        let launched = self.launch_in(&toolchain, workdir.path()).await;
        match launched {
            Ok(process) => {
                self.process = Some(process);
                self.workdir = Some(workdir);
                self.started = true;
                info!("Broker ready on {}", self.urls().join(", "));
                Ok(())
            }
            Err(e) => {
                error!("Broker failed to start: {}", e);
                if let Err(cleanup) = workdir.close() {
                    warn!("Failed to remove working directory: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn launch_in(
        &self,
        toolchain: &Toolchain,
        workdir: &Path,
    ) -> Result<BrokerProcess, BrokerError> {
        render::write_artifacts(&self.config, toolchain, workdir).await?;

        let layout = Layout::for_toolchain(toolchain, workdir);
        let plan = toolchain.broker_plan(&self.config, workdir, &layout);
        // Output of earlier runs stays in the buffer for `logs()`.
        let from = self.output.len();
        let process = BrokerProcess::spawn(
            plan.into_command(),
            &toolchain.broker_name(),
            self.output.clone(),
        )?;

        let probe = ReadinessProbe::mosquitto(self.config.readiness.clone());
        if let Err(e) = probe.wait(&self.output, from, &self.readiness).await {
            process.terminate(self.config.stop_grace).await;
            return Err(e);
        }
        Ok(process)
    }

    /// Terminates the broker and removes its working directory.
    ///
    /// The broker counts as stopped even when removing the directory fails;
    /// that failure is reported as [`BrokerError::Cleanup`].
    pub async fn stop(&mut self) -> Result<(), BrokerError> {
        if !self.started {
            return Err(BrokerError::NotStarted);
        }

        if let Some(process) = self.process.take() {
            let termination = process.terminate(self.config.stop_grace).await;
            debug!("Broker terminated: {:?}", termination);
        }
        self.started = false;
        self.readiness.set_state(ReadinessState::NotReadyYet(
            "Broker stopped".to_string(),
        ));

        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            workdir
                .close()
                .map_err(|source| BrokerError::Cleanup { path, source })?;
        }
        info!("Broker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_before_start_is_a_usage_error() {
        let mut broker = Broker::new(BrokerOverrides::default());
        let err = broker.stop().await.unwrap_err();
        assert!(matches!(err, BrokerError::NotStarted));
        assert!(!broker.is_started());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_touching_disk() {
        let mut broker = Broker::new(BrokerOverrides {
            listen: Some(vec![]),
            ..Default::default()
        });
        let err = broker.start().await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig(_)));
        assert!(broker.working_dir().is_none());
        assert!(!broker.is_started());
    }

    #[tokio::test]
    async fn missing_runtime_is_reported_before_provisioning() {
        let mut broker = Broker::new(BrokerOverrides {
            runtime: Some("/nonexistent/docker".into()),
            ..Default::default()
        });
        let err = broker.start().await.unwrap_err();
        assert!(matches!(err, BrokerError::ProgramNotFound { ref program } if program == "/nonexistent/docker"));
        assert!(broker.working_dir().is_none());
        assert!(broker.logs().is_empty());
    }

    #[test]
    fn new_broker_exposes_its_config() {
        let broker = Broker::new(BrokerOverrides {
            listen: Some(vec![
                Listener::new(Protocol::Mqtt, "127.0.0.1", 1883),
                Listener::new(Protocol::Wss, "localhost", 8443),
            ]),
            ..Default::default()
        });
        assert!(!broker.is_started());
        assert!(broker.pid().is_none());
        assert_eq!(broker.urls(), ["mqtt://127.0.0.1:1883", "wss://localhost:8443"]);
        assert_eq!(*broker.readiness().borrow(), ReadinessState::Unknown);
    }
}
