//! Captured broker output.
//!
//! Everything the broker writes to stdout and stderr lands in one
//! append-only [`OutputBuffer`], interleaved in arrival order. Each append is
//! also published as an [`OutputEvent`] on a broadcast channel while the
//! buffer lock is still held, so subscribers see chunks in the same order the
//! buffer records them.
//!
//! The buffer is never truncated. It outlives the process and remains
//! readable after the broker stops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use regex::Regex;
use tokio::sync::broadcast;

/// Which standard stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// A chunk of output as it was read from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl OutputEvent {
    pub fn new(stream: Stream, chunk: Bytes) -> Self {
        match stream {
            Stream::Stdout => OutputEvent::Stdout(chunk),
            Stream::Stderr => OutputEvent::Stderr(chunk),
        }
    }

    pub fn stream(&self) -> Stream {
        match self {
            OutputEvent::Stdout(_) => Stream::Stdout,
            OutputEvent::Stderr(_) => Stream::Stderr,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        match self {
            OutputEvent::Stdout(chunk) | OutputEvent::Stderr(chunk) => chunk,
        }
    }
}

/// Shared accumulation buffer plus the chunk event channel.
///
/// Cloning is cheap and every clone refers to the same buffer.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    events: broadcast::Sender<OutputEvent>,
}

impl OutputBuffer {
    /// Creates an empty buffer whose event channel keeps up to `capacity`
    /// chunks for slow subscribers.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a chunk and notifies subscribers.
    pub fn append(&self, stream: Stream, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let mut data = self.lock();
        data.extend_from_slice(&chunk);
        // No subscribers is the normal case; the buffer still has the data.
        let _ = self.events.send(OutputEvent::new(stream, chunk));
    }

    /// Returns a receiver for chunks appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.events.subscribe()
    }

    /// Full accumulated output as text. Invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// Scans everything accumulated so far for `pattern`.
    ///
    /// The whole buffer is searched, so a match split across two chunks is
    /// found once both have arrived.
    pub fn matches(&self, pattern: &Regex) -> bool {
        self.matches_since(pattern, 0)
    }

    /// Like [`matches`](Self::matches), but ignores the first `offset` bytes.
    ///
    /// Used to scan only what one run of a process produced when the buffer
    /// also holds output of earlier runs.
    pub fn matches_since(&self, pattern: &Regex, offset: usize) -> bool {
        let data = self.lock();
        let start = offset.min(data.len());
        pattern.is_match(&String::from_utf8_lossy(&data[start..]))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}
