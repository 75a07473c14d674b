//! Readiness state management for a launched broker.
//!
//! A broker counts as ready once it has bound its listeners, which Mosquitto
//! announces with a `mosquitto version <x.y.z> running` log line. The
//! [`ReadinessProbe`] races a periodic scan of the captured output against a
//! hard deadline; whichever completes first decides the outcome and the other
//! branch is dropped, so nothing can flip the state after the race resolved.
//!
//! The result is published through [`Readiness`], a watch channel that
//! observers can subscribe to.

use std::{fmt, sync::OnceLock, time::Duration};

use regex::Regex;
use tokio::{
    sync::watch,
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::output::OutputBuffer;
use crate::broker::BrokerError;

/// Startup banner printed by Mosquitto once it accepts connections.
pub const BANNER_PATTERN: &str = r"mosquitto version [0-9.]+ running";

fn banner() -> &'static Regex {
    static BANNER: OnceLock<Regex> = OnceLock::new();
    BANNER.get_or_init(|| Regex::new(BANNER_PATTERN).expect("banner pattern is a valid regex"))
}

/// Represents the current readiness state of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    /// The broker announced that it is accepting connections.
    Ready,
    /// The broker is not ready, with a reason describing why.
    NotReadyYet(String),
    /// Nothing has been launched yet.
    Unknown,
}

impl ReadinessState {
    /// Returns true if the broker is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    /// Returns a short string representation of the state.
    pub fn as_str(&self) -> &str {
        match self {
            ReadinessState::Ready => "Ready",
            ReadinessState::NotReadyYet(_) => "NotReadyYet",
            ReadinessState::Unknown => "Unknown",
        }
    }

    /// Returns the reason string if the state is `NotReadyYet`, otherwise an empty string.
    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReadyYet(reason) => reason,
            _ => "",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Ready => write!(f, "Ready"),
            ReadinessState::NotReadyYet(reason) => write!(f, "NotReadyYet: {}", reason),
            ReadinessState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Shared readiness tracker that allows multiple observers to follow state changes.
#[derive(Debug, Clone)]
pub struct Readiness {
    state_tx: watch::Sender<ReadinessState>,
    state_rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    /// Creates a new readiness tracker with an initial `Unknown` state.
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ReadinessState::Unknown);
        Self { state_tx, state_rx }
    }

    /// Returns a receiver that can be used to subscribe to readiness changes.
    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    /// Returns the current readiness state without subscribing.
    pub fn current_state(&self) -> ReadinessState {
        self.state_rx.borrow().clone()
    }

    /// Updates the readiness state and logs the transition at debug level.
    pub fn set_state(&self, state: ReadinessState) {
        let old_state = self.state_tx.send_replace(state.clone());
        debug!("Readiness changed: {} -> {}", old_state, state);
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing of the readiness race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSettings {
    /// How often the captured output is scanned for the banner.
    pub poll_interval: Duration,
    /// Hard deadline for the banner to appear.
    pub timeout: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Waits for a startup banner in captured output, bounded by a deadline.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pattern: Regex,
    settings: ReadinessSettings,
}

impl ReadinessProbe {
    /// Probe for Mosquitto's `version ... running` banner.
    pub fn mosquitto(settings: ReadinessSettings) -> Self {
        Self::with_pattern(banner().clone(), settings)
    }

    pub fn with_pattern(pattern: Regex, settings: ReadinessSettings) -> Self {
        Self { pattern, settings }
    }

    /// Races the banner poll against the deadline.
    ///
    /// Only output appended after the first `from` bytes is scanned, so a
    /// banner left over from an earlier run never counts. On
    /// success `readiness` becomes `Ready`; on timeout it is set to
    /// `NotReadyYet` and `BrokerError::ReadinessTimeout` is returned. Both
    /// timers are dropped when this returns.
    pub async fn wait(
        &self,
        output: &OutputBuffer,
        from: usize,
        readiness: &Readiness,
    ) -> Result<(), BrokerError> {
        readiness.set_state(ReadinessState::NotReadyYet(
            "Waiting for startup banner".to_string(),
        ));

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep(self.settings.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "No startup banner after {:?} ({} bytes of output captured)",
                        self.settings.timeout,
                        output.len()
                    );
                    readiness.set_state(ReadinessState::NotReadyYet(format!(
                        "No startup banner within {:?}",
                        self.settings.timeout
                    )));
                    return Err(BrokerError::ReadinessTimeout(self.settings.timeout));
                }
                _ = poll.tick() => {
                    if output.matches_since(&self.pattern, from) {
                        readiness.set_state(ReadinessState::Ready);
                        return Ok(());
                    }
                }
            }
        }
    }
}
