//! Core decryption-failure tracking shared by the runtime and its consumers.
//!
//! This crate defines the tracker itself, the observation/report types, the
//! boundary that classifies timeline events, and the command, report and
//! status channels used to drive a tracker from another task.

/// Async command, report and status channel primitives.
pub mod channel;
/// Classification of timeline event content into decryption outcomes.
pub mod classify;
/// Injectable millisecond clocks.
pub mod clock;
/// Stable tracker error types.
pub mod error;
/// Dedup/debounce tracker for decryption failures.
pub mod tracker;
/// Observation, report and protocol types.
pub mod types;

pub use channel::{
    EventStream, ReportStream, RuntimeChannels, TrackerChannelError, TrackerChannels,
};
pub use classify::{BAD_ENCRYPTED_MSGTYPE, classify_clear_content};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{TrackerError, TrackerErrorCategory};
pub use tracker::{
    DEFAULT_GRACE_PERIOD_MS, DecryptionFailureTracker, Reporter, TrackedEventState, TrackerConfig,
};
pub use types::{
    DecryptedEvent, DecryptionFailure, DecryptionObservation, DecryptionOutcome, TrackerCommand,
    TrackerEvent,
};
