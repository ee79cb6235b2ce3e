//! Structured event stream.
//!
//! Session milestones serialized as newline-delimited JSON, each wrapped with
//! a monotonically increasing sequence number. Gaze messages are not
//! recorded individually; phase changes and connection churn are.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{ConnectionId, Phase};

/// Why the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// SIGINT / Ctrl+C.
    Interrupted,
    /// SIGTERM.
    Terminated,
    /// The listener task exited on its own.
    ListenerClosed,
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted while the installation runs.
///
/// Tagged with `"type"` when serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The listener is bound and accepting connections.
    ServerStarted {
        /// When the server started.
        timestamp: DateTime<Utc>,
        /// Address actually bound.
        bind: String,
    },

    /// The server has stopped.
    ServerStopped {
        /// When the server stopped.
        timestamp: DateTime<Utc>,
        /// Why it stopped.
        reason: StopReason,
    },

    /// A WebSocket connection was accepted.
    ClientConnected {
        /// When the client connected.
        timestamp: DateTime<Utc>,
        /// Assigned connection id.
        connection_id: ConnectionId,
    },

    /// A WebSocket connection closed.
    ClientDisconnected {
        /// When the client left.
        timestamp: DateTime<Utc>,
        /// Connection id.
        connection_id: ConnectionId,
        /// Watchers remaining after the disconnect.
        watchers: usize,
    },

    /// The session entered a new phase.
    PhaseEntered {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Phase left.
        from: Phase,
        /// Phase entered.
        phase: Phase,
        /// Pressure at the moment of the transition.
        pressure: f64,
        /// What caused it (`pressure`, `timer`, `trigger`, `reset`).
        cause: &'static str,
    },

    /// The session was reset to waiting.
    ExperienceReset {
        /// When the reset happened.
        timestamp: DateTime<Utc>,
        /// `timer` or `reset`.
        cause: &'static str,
    },
}

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped: a full disk must not stop
/// the installation.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
