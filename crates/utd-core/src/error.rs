use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackerErrorCategory {
    /// The caller handed the tracker an observation that breaks its contract.
    InvalidInput,
    /// Serialization/deserialization failure.
    Serialization,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct TrackerError {
    /// High-level error category.
    pub category: TrackerErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl TrackerError {
    /// Construct a new tracker error.
    pub fn new(
        category: TrackerErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build the standard error for an observation that carries no event ID.
    pub fn missing_event_id() -> Self {
        Self::new(
            TrackerErrorCategory::InvalidInput,
            "missing_event_id",
            "decryption observation has no event identifier",
        )
    }

    /// Build a standard error for a timeline event payload that could not be read.
    pub fn malformed_event(reason: impl std::fmt::Display) -> Self {
        Self::new(
            TrackerErrorCategory::Serialization,
            "malformed_event",
            format!("timeline event could not be decoded: {reason}"),
        )
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_event(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_missing_event_id_code_stable() {
        let err = TrackerError::missing_event_id();
        assert_eq!(err.code, "missing_event_id");
        assert_eq!(err.category, TrackerErrorCategory::InvalidInput);
    }

    #[test]
    fn formats_category_code_and_message() {
        let err = TrackerError::new(TrackerErrorCategory::InvalidInput, "bad_id", "empty id");
        assert_eq!(err.to_string(), "InvalidInput:bad_id: empty id");
    }

    #[test]
    fn maps_json_errors_to_serialization_category() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("input is not valid json");
        let err = TrackerError::from(json_err);
        assert_eq!(err.category, TrackerErrorCategory::Serialization);
        assert_eq!(err.code, "malformed_event");
    }
}
