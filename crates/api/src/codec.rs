// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bidirectional mapping between one line of newline-delimited JSON and a
//! typed protocol message (C1).
//!
//! `decode` never rejects an unrecognised `type` — it classifies the line
//! as [`Decoded::Unknown`] and leaves the decision of what to do about it
//! (log and ignore, per §4.8) to the session handler. A genuinely
//! malformed line (invalid JSON, or JSON without a string `type` field)
//! is the one case this module treats as an error.

use serde_json::Value;
use thiserror::Error;

use crate::{ClientMessage, ServerMessage};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("message is missing a string \"type\" field")]
    MissingType { id: Option<String> },
}

impl CodecError {
    /// The correlation id, if one could be recovered from the line. Always
    /// `None` for [`Self::Parse`] — the JSON itself didn't parse, so there
    /// is nothing to read an `id` field out of.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Parse(_) => None,
            Self::MissingType { id } => id.as_deref(),
        }
    }
}

/// The outcome of decoding one line.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// A recognised `type`, fully parsed into a [`ClientMessage`].
    Known(Box<ClientMessage>),
    /// An unrecognised `type`. The session handler logs and ignores this
    /// rather than closing the connection.
    Unknown { message_type: String, id: Option<String> },
}

const KNOWN_CLIENT_TYPES: &[&str] = &[
    "hello",
    "ping",
    "get_topology",
    "create_node",
    "update_node",
    "delete_node",
    "add_component",
    "remove_component",
    "set_sampling",
    "subscribe",
    "unsubscribe",
    "command",
    "auth",
    "register",
    "get_users",
    "update_user",
    "delete_user",
];

/// Parses one line of the wire protocol. The line's trailing newline, if
/// any, is trimmed before parsing; the newline is framing, not payload.
pub fn decode(line: &str) -> Result<Decoded, CodecError> {
    let value: Value = serde_json::from_str(line.trim_end_matches(['\n', '\r']))?;
    let id = value.get("id").and_then(Value::as_str).map(str::to_string);
    let Some(message_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        return Err(CodecError::MissingType { id });
    };

    if KNOWN_CLIENT_TYPES.contains(&message_type.as_str()) {
        let message: ClientMessage = serde_json::from_value(value)?;
        Ok(Decoded::Known(Box::new(message)))
    } else {
        Ok(Decoded::Unknown { message_type, id })
    }
}

/// Serialises a server message to a single line, newline-terminated.
pub fn encode(message: &ServerMessage) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = decode("not json at all").unwrap_err();
        assert!(matches!(err, CodecError::Parse(_)));
    }

    #[test]
    fn missing_type_is_rejected_but_keeps_the_correlation_id() {
        let err = decode(r#"{"id":"c-1"}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingType { .. }));
        assert_eq!(err.id(), Some("c-1"));
    }

    #[test]
    fn decode_trims_trailing_newline() {
        let decoded = decode("{\"type\":\"ping\",\"id\":\"c-1\"}\n").unwrap();
        assert!(matches!(decoded, Decoded::Known(_)));
    }

    #[test]
    fn encode_round_trips_through_decode_for_known_shapes() {
        let line = encode(&ServerMessage::Pong { id: Some("c-9".to_string()) }).unwrap();
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["id"], "c-9");
    }
}
