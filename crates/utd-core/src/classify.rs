use serde_json::Value;

use crate::{
    error::TrackerError,
    types::{DecryptedEvent, DecryptionOutcome},
};

/// `msgtype` of the placeholder content a client substitutes for undecryptable events.
pub const BAD_ENCRYPTED_MSGTYPE: &str = "m.bad.encrypted";

/// Derive the decryption outcome from an event's clear content.
///
/// Only the `m.bad.encrypted` placeholder counts as a failure; any other
/// shape, including an empty object, is treated as successfully decrypted.
pub fn classify_clear_content(content: &Value) -> DecryptionOutcome {
    match content.get("msgtype").and_then(Value::as_str) {
        Some(BAD_ENCRYPTED_MSGTYPE) => DecryptionOutcome::Failure,
        _ => DecryptionOutcome::Success,
    }
}

impl DecryptedEvent {
    /// Build an observation from a timeline event JSON object.
    ///
    /// The event ID is taken from the top-level `event_id` field and the
    /// outcome from `content`. A missing `content` counts as success.
    pub fn from_timeline_event(event: &Value) -> Result<Self, TrackerError> {
        if !event.is_object() {
            return Err(TrackerError::malformed_event("expected a JSON object"));
        }

        let event_id = event
            .get("event_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);
        let outcome = event
            .get("content")
            .map(classify_clear_content)
            .unwrap_or(DecryptionOutcome::Success);

        Ok(Self { event_id, outcome })
    }

    /// Parse and classify one JSON-encoded timeline event.
    pub fn from_timeline_json(raw: &str) -> Result<Self, TrackerError> {
        let value = serde_json::from_str::<Value>(raw)?;
        Self::from_timeline_event(&value)
    }
}
