//! Wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`. Events without a payload may
//! omit `data`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{Role, Snapshot};

/// Event names a client may send.
pub const CLIENT_EVENTS: [&str; 6] = [
    "join-as",
    "gaze-start",
    "gaze-hold",
    "gaze-end",
    "trigger-transmutation",
    "reset-experience",
];

/// Client → server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Declare a role for this connection.
    JoinAs(Role),
    /// Begin gazing at the object.
    GazeStart,
    /// Sustained-gaze tick.
    GazeHold,
    /// Stop gazing.
    GazeEnd,
    /// Manual jump to transmutation.
    TriggerTransmutation,
    /// Manual return to waiting.
    ResetExperience,
}

impl ClientMessage {
    /// Wire name of the event.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::JoinAs(_) => "join-as",
            Self::GazeStart => "gaze-start",
            Self::GazeHold => "gaze-hold",
            Self::GazeEnd => "gaze-end",
            Self::TriggerTransmutation => "trigger-transmutation",
            Self::ResetExperience => "reset-experience",
        }
    }
}

/// Server → client message. Both variants carry a full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once, immediately after connecting.
    InitialState(Snapshot),
    /// Sent to every client after each state change.
    StateUpdate(Snapshot),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not a JSON object with a string `event` field.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// `event` names nothing the server understands.
    #[error("unknown event '{event}'{}", did_you_mean(.suggestion))]
    UnknownEvent {
        /// Event name as received.
        event: String,
        /// Closest known event, if any is near enough.
        suggestion: Option<&'static str>,
    },

    /// Known event with a payload of the wrong shape.
    #[error("invalid payload for '{event}': {message}")]
    InvalidPayload {
        /// Event name.
        event: &'static str,
        /// Parser message.
        message: String,
    },
}

#[allow(clippy::ref_option)]
fn did_you_mean(suggestion: &Option<&'static str>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

/// Decodes one text frame.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing what was wrong with the frame.
pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Some(event) = value.get("event").and_then(serde_json::Value::as_str) else {
        return Err(DecodeError::Malformed(
            "expected an object with a string 'event' field".to_string(),
        ));
    };

    let Some(known) = CLIENT_EVENTS.iter().copied().find(|e| *e == event) else {
        return Err(DecodeError::UnknownEvent {
            event: event.to_string(),
            suggestion: suggest_event(event),
        });
    };

    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        event: known,
        message: e.to_string(),
    })
}

/// Encodes a server message as a text frame.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be serialized (non-finite
/// numbers).
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Suggests the closest known event name for a typo.
///
/// Returns a match only when its Damerau-Levenshtein distance is ≤ 3.
#[must_use]
pub fn suggest_event(input: &str) -> Option<&'static str> {
    CLIENT_EVENTS
        .iter()
        .map(|name| (*name, strsim::damerau_levenshtein(input, name)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name)
}
