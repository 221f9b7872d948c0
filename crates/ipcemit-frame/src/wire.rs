//! SYN/ACK wire frames.
//!
//! Field names are part of the contract, both sides must agree on them:
//!
//! ```text
//! SYN: { "_cmd": "ipcemit|syn", "_ack": <int, optional>, "_ev": "<event>", "_msg": <payload> }
//! ACK: { "_cmd": "ipcemit|ack", "_ack": <int>, "_msg": <payload, optional>,
//!        "_err": { "message": "<string>", "stack": "<string, optional>" } }
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `_cmd` value of request frames.
pub const SYN_MARKER: &str = "ipcemit|syn";

/// `_cmd` value of reply frames.
pub const ACK_MARKER: &str = "ipcemit|ack";

/// Event name used by the `send`/`send_async` shorthands.
pub const DEFAULT_EVENT: &str = "message";

/// Largest correlation id (2^53 - 1). Every JSON peer represents it exactly.
pub const MAX_CORRELATION_ID: u64 = (1 << 53) - 1;

/// Token pairing a SYN frame with its ACK frame.
///
/// Always in `1..=MAX_CORRELATION_ID`; `0` on the wire means "no reply wanted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Returns `None` for `0` and for values above [`MAX_CORRELATION_ID`].
    pub fn new(raw: u64) -> Option<Self> {
        if raw == 0 || raw > MAX_CORRELATION_ID {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for CorrelationId {
    type Error = String;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("correlation id out of range: {raw}"))
    }
}

impl From<CorrelationId> for u64 {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transmissible form of a failure: a message plus an optional trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    fn into_value(self) -> Value {
        let mut map = Map::with_capacity(2);
        map.insert("message".to_string(), Value::String(self.message));
        if let Some(stack) = self.stack {
            map.insert("stack".to_string(), Value::String(stack));
        }
        Value::Object(map)
    }
}

/// Request frame. `ack` is set iff the sender waits for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynFrame {
    #[serde(
        rename = "_ack",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_ack"
    )]
    pub ack: Option<CorrelationId>,
    #[serde(rename = "_ev")]
    pub event: String,
    #[serde(rename = "_msg", default)]
    pub message: Value,
}

/// Reply frame. At most one of `message`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckFrame {
    #[serde(rename = "_ack")]
    pub ack: CorrelationId,
    #[serde(rename = "_msg", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(rename = "_err", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl SynFrame {
    /// Fire-and-forget request.
    pub fn new(event: impl Into<String>, message: Value) -> Self {
        Self {
            ack: None,
            event: event.into(),
            message,
        }
    }

    /// Request that expects an ACK carrying `ack`.
    pub fn with_ack(event: impl Into<String>, message: Value, ack: CorrelationId) -> Self {
        Self {
            ack: Some(ack),
            event: event.into(),
            message,
        }
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(4);
        map.insert("_cmd".to_string(), Value::String(SYN_MARKER.to_string()));
        if let Some(ack) = self.ack {
            map.insert("_ack".to_string(), Value::from(ack.get()));
        }
        map.insert("_ev".to_string(), Value::String(self.event));
        map.insert("_msg".to_string(), self.message);
        Value::Object(map)
    }
}

impl AckFrame {
    pub fn success(ack: CorrelationId, message: Value) -> Self {
        Self {
            ack,
            message: Some(message),
            error: None,
        }
    }

    pub fn failure(ack: CorrelationId, error: ErrorEnvelope) -> Self {
        Self {
            ack,
            message: None,
            error: Some(error),
        }
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(3);
        map.insert("_cmd".to_string(), Value::String(ACK_MARKER.to_string()));
        map.insert("_ack".to_string(), Value::from(self.ack.get()));
        match (self.message, self.error) {
            (_, Some(error)) => {
                map.insert("_err".to_string(), error.into_value());
            }
            (Some(message), None) => {
                map.insert("_msg".to_string(), message);
            }
            (None, None) => {}
        }
        Value::Object(map)
    }
}

/// A recognized frame, tagged by `_cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_cmd")]
pub enum WireFrame {
    #[serde(rename = "ipcemit|syn")]
    Syn(SynFrame),
    #[serde(rename = "ipcemit|ack")]
    Ack(AckFrame),
}

impl WireFrame {
    /// Parse a channel payload.
    ///
    /// Returns `None` for anything that is not a well-formed SYN/ACK frame;
    /// other traffic may share the channel and is left alone.
    pub fn from_value(value: &Value) -> Option<Self> {
        let cmd = value.get("_cmd")?.as_str()?;
        if cmd != SYN_MARKER && cmd != ACK_MARKER {
            return None;
        }
        match WireFrame::deserialize(value) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::debug!(cmd, error = %err, "ignoring malformed frame");
                None
            }
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            WireFrame::Syn(frame) => frame.into_value(),
            WireFrame::Ack(frame) => frame.into_value(),
        }
    }
}

impl From<SynFrame> for WireFrame {
    fn from(frame: SynFrame) -> Self {
        WireFrame::Syn(frame)
    }
}

impl From<AckFrame> for WireFrame {
    fn from(frame: AckFrame) -> Self {
        WireFrame::Ack(frame)
    }
}

// `_ack: 0` (or null) on a SYN means no reply is wanted.
fn optional_ack<'de, D>(deserializer: D) -> Result<Option<CorrelationId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u64>::deserialize(deserializer)?;
    match raw {
        None | Some(0) => Ok(None),
        Some(raw) => CorrelationId::new(raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("correlation id out of range: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    #[test]
    fn correlation_id_range() {
        assert!(CorrelationId::new(0).is_none());
        assert!(CorrelationId::new(MAX_CORRELATION_ID + 1).is_none());
        assert_eq!(CorrelationId::new(MAX_CORRELATION_ID).unwrap().get(), MAX_CORRELATION_ID);
    }

    #[test]
    fn syn_frame_shape() {
        let value = SynFrame::with_ack("message", json!("ping"), id(7)).into_value();
        assert_eq!(
            value,
            json!({"_cmd": SYN_MARKER, "_ack": 7, "_ev": "message", "_msg": "ping"})
        );

        let value = SynFrame::new("log", json!({"level": "info"})).into_value();
        assert!(value.get("_ack").is_none());
    }

    #[test]
    fn ack_frame_shape() {
        let ok = AckFrame::success(id(3), json!("pong")).into_value();
        assert_eq!(ok, json!({"_cmd": ACK_MARKER, "_ack": 3, "_msg": "pong"}));

        let err = AckFrame::failure(id(4), ErrorEnvelope::new("boom").with_stack("at x"))
            .into_value();
        assert_eq!(
            err,
            json!({"_cmd": ACK_MARKER, "_ack": 4, "_err": {"message": "boom", "stack": "at x"}})
        );
    }

    #[test]
    fn markers_match_serde_tags() {
        let syn = serde_json::to_value(WireFrame::Syn(SynFrame::new("e", json!(1)))).unwrap();
        assert_eq!(syn["_cmd"], SYN_MARKER);
        let ack =
            serde_json::to_value(WireFrame::Ack(AckFrame::success(id(1), json!(1)))).unwrap();
        assert_eq!(ack["_cmd"], ACK_MARKER);
    }

    #[test]
    fn parses_syn_from_peer() {
        let frame = WireFrame::from_value(
            &json!({"_cmd": SYN_MARKER, "_ack": 12, "_ev": "job", "_msg": {"delay": 10}}),
        );
        match frame {
            Some(WireFrame::Syn(syn)) => {
                assert_eq!(syn.ack, Some(id(12)));
                assert_eq!(syn.event, "job");
                assert_eq!(syn.message, json!({"delay": 10}));
            }
            other => panic!("expected syn frame, got {other:?}"),
        }
    }

    #[test]
    fn syn_without_message_or_with_zero_ack() {
        let frame =
            WireFrame::from_value(&json!({"_cmd": SYN_MARKER, "_ack": 0, "_ev": "tick"})).unwrap();
        assert_eq!(
            frame,
            WireFrame::Syn(SynFrame {
                ack: None,
                event: "tick".to_string(),
                message: Value::Null,
            })
        );
    }

    #[test]
    fn parses_ack_error_without_stack() {
        let frame =
            WireFrame::from_value(&json!({"_cmd": ACK_MARKER, "_ack": 5, "_err": {"message": "no"}}))
                .unwrap();
        let WireFrame::Ack(ack) = frame else {
            panic!("expected ack frame");
        };
        assert_eq!(ack.ack, id(5));
        assert!(ack.message.is_none());
        assert_eq!(ack.error, Some(ErrorEnvelope::new("no")));
    }

    #[test]
    fn ignores_foreign_and_malformed_traffic() {
        assert!(WireFrame::from_value(&json!("plain string")).is_none());
        assert!(WireFrame::from_value(&json!({"type": "ping"})).is_none());
        assert!(WireFrame::from_value(&json!({"_cmd": "other|syn", "_ev": "x"})).is_none());
        assert!(WireFrame::from_value(&json!({"_cmd": ACK_MARKER, "_ack": 0})).is_none());
        assert!(WireFrame::from_value(&json!({"_cmd": SYN_MARKER, "_msg": 1})).is_none());
    }
}
