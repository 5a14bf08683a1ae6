use serde::{Deserialize, Serialize};

/// Result of the most recent decryption attempt for one timeline event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DecryptionOutcome {
    /// Clear content is available.
    Success,
    /// The event could not be decrypted.
    Failure,
}

/// Anything the tracker can observe: an event identifier plus its outcome.
pub trait DecryptionObservation {
    /// Event ID, or `None` when the source event carries no identifier.
    fn event_id(&self) -> Option<&str>;

    /// Outcome of the latest decryption attempt.
    fn outcome(&self) -> DecryptionOutcome;
}

/// Owned decryption observation passed across the command channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecryptedEvent {
    /// Matrix event ID, for example `$abc:example.org`.
    pub event_id: Option<String>,
    /// Decryption outcome derived at the boundary where the event was built.
    pub outcome: DecryptionOutcome,
}

impl DecryptedEvent {
    /// Observation for an event that failed to decrypt.
    pub fn failed(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            outcome: DecryptionOutcome::Failure,
        }
    }

    /// Observation for an event that decrypted successfully.
    pub fn decrypted(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            outcome: DecryptionOutcome::Success,
        }
    }
}

impl DecryptionObservation for DecryptedEvent {
    fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    fn outcome(&self) -> DecryptionOutcome {
        self.outcome
    }
}

/// One-time failure record handed to the reporting sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecryptionFailure {
    /// ID of the event that failed to decrypt.
    pub failed_event_id: String,
    /// Clock value at which the failure was first observed, in milliseconds.
    pub failed_at_ms: u64,
}

/// Command channel input accepted by the tracker runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackerCommand {
    /// Record one decryption observation.
    Observe(DecryptedEvent),
    /// Run a check pass at `now_ms` and report everything that became ready.
    Flush {
        /// Logical "now" for the check pass. `u64::MAX` promotes every failure.
        now_ms: u64,
    },
}

/// Status events emitted by the tracker runtime.
///
/// Reports themselves travel over the runtime's report stream, never here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackerEvent {
    /// An observation violated the tracker contract and was dropped.
    ObservationRejected {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// A `Flush` command finished.
    Flushed {
        /// Failures promoted to the report queue by this flush.
        queued: usize,
        /// Failures delivered to the report stream by this flush. Failures a
        /// persistent store suppressed are not counted.
        reported: usize,
    },
}
