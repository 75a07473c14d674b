//! Broker subprocess handle: launch, output capture, and bounded teardown.
//!
//! [`BrokerProcess`] owns the child and the two tasks copying its stdout and
//! stderr into an [`OutputBuffer`]. It is acquired by [`BrokerProcess::spawn`]
//! and released exactly once by [`BrokerProcess::terminate`], which sends
//! SIGTERM, escalates to SIGKILL after a grace period, and then shuts the
//! capture tasks down. Dropping the handle without terminating still kills
//! the child (`kill_on_drop`) and cancels the capture tasks.

use std::{
    process::{ExitStatus, Stdio},
    time::Duration,
};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
    time::{timeout, timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::output::{OutputBuffer, Stream};
use crate::broker::BrokerError;

/// How long capture tasks get to drain the pipes after the child exited.
const CAPTURE_DRAIN: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

/// How a process ended during [`BrokerProcess::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period. The status is missing if waiting on
    /// the child reported an error.
    Graceful(Option<ExitStatus>),
    /// Did not exit in time and was killed.
    Killed,
}

/// A running broker process and its output capture.
#[derive(Debug)]
pub struct BrokerProcess {
    name: String,
    child: Child,
    capture: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl BrokerProcess {
    /// Spawns `cmd` with stdin discarded and stdout/stderr captured into `output`.
    pub fn spawn(mut cmd: Command, name: &str, output: OutputBuffer) -> Result<Self, BrokerError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BrokerError::Spawn {
            program: name.to_string(),
            source,
        })?;
        info!("Spawned '{}' (pid {:?})", name, child.id());

        let cancel = CancellationToken::new();
        let mut capture = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            capture.push(tokio::spawn(capture_stream(
                stdout,
                Stream::Stdout,
                output.clone(),
                cancel.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            capture.push(tokio::spawn(capture_stream(
                stderr,
                Stream::Stderr,
                output,
                cancel.clone(),
            )));
        }

        Ok(Self {
            name: name.to_string(),
            child,
            capture,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, or `None` once the child has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// True while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stops the process: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Errors reported by the child while it dies are logged and otherwise
    /// ignored. Capture tasks are released before this returns.
    pub async fn terminate(mut self, grace: Duration) -> Termination {
        if let Some(pid) = self.child.id() {
            debug!("Sending SIGTERM to '{}' (pid {})", self.name, pid);
            // SAFETY: `pid` belongs to our unreaped child, so it cannot have
            // been recycled for another process.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let termination = match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("'{}' stopped gracefully ({})", self.name, status);
                Termination::Graceful(Some(status))
            }
            Ok(Err(e)) => {
                debug!("Ignoring wait error for '{}': {}", self.name, e);
                Termination::Graceful(None)
            }
            Err(_) => {
                warn!(
                    "'{}' did not stop within {:?}, force killing",
                    self.name, grace
                );
                if let Err(e) = self.child.kill().await {
                    debug!("Ignoring kill error for '{}': {}", self.name, e);
                }
                Termination::Killed
            }
        };

        self.release_capture().await;
        termination
    }

    /// Lets the capture tasks read to EOF, cancelling whatever is still
    /// running after [`CAPTURE_DRAIN`].
    async fn release_capture(&mut self) {
        let deadline = Instant::now() + CAPTURE_DRAIN;
        for mut handle in self.capture.drain(..) {
            if timeout_at(deadline, &mut handle).await.is_err() {
                self.cancel.cancel();
                if let Err(e) = handle.await {
                    debug!("Capture task ended abnormally: {}", e);
                }
            }
        }
        self.cancel.cancel();
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Copies one stream into the buffer chunk by chunk until EOF or cancellation.
async fn capture_stream<R>(mut reader: R, stream: Stream, output: OutputBuffer, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            _ = cancel.cancelled() => {
                trace!("{} capture cancelled", stream.as_str());
                break;
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    trace!("{} reached EOF", stream.as_str());
                    break;
                }
                Ok(_) => output.append(stream, buf.split().freeze()),
                Err(e) => {
                    warn!("Failed to read broker {}: {}", stream.as_str(), e);
                    break;
                }
            },
        }
    }
}
