//! Failure normalization across the endpoint boundary.
//!
//! A handler can fail in several shapes: a typed error, a bare string, a
//! structured JSON value, or a panic. [`wrap`] turns any of them into an
//! [`ErrorEnvelope`] that fits in an ACK frame; [`unwrap`] rebuilds an
//! [`AckError`] from the envelope on the awaiting side.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;

use ipcemit_frame::ErrorEnvelope;
use serde_json::Value;

const PANIC_FALLBACK: &str = "handler panicked";

/// Why a handler did not produce a value.
pub enum Failure {
    /// A typed error value.
    Error(Box<dyn StdError + Send + Sync>),
    /// A plain message.
    Text(String),
    /// An arbitrary structured value.
    Value(Value),
    /// A panic payload caught while invoking or polling the handler.
    Panic(Box<dyn Any + Send>),
}

impl Failure {
    pub fn error(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Error(Box::new(err))
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Panic(payload) => f
                .debug_tuple("Panic")
                .field(&panic_message(payload.as_ref()))
                .finish(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&wrap(self).message)
    }
}

impl From<String> for Failure {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Failure {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for Failure {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<AckError> for Failure {
    fn from(err: AckError) -> Self {
        Self::error(err)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::error(err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Self::error(err)
    }
}

impl From<Box<dyn StdError + Send + Sync>> for Failure {
    fn from(err: Box<dyn StdError + Send + Sync>) -> Self {
        Self::Error(err)
    }
}

/// Category of an [`AckError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckErrorKind {
    /// The peer reported a failure, including a missing handler.
    Remote,
    /// No ACK arrived within the timeout, or the call was reaped.
    Timeout,
    /// The SYN frame could not be dispatched.
    ChannelClosed,
    /// The emitter went away before a reply arrived.
    Dropped,
}

impl fmt::Display for AckErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Timeout => "timeout",
            Self::ChannelClosed => "channel closed",
            Self::Dropped => "dropped",
        })
    }
}

/// The error a [`crate::Reply`] resolves to.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AckError {
    kind: AckErrorKind,
    message: String,
    stack: String,
}

impl AckError {
    fn local(kind: AckErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: local_trace(),
        }
    }

    pub(crate) fn timeout() -> Self {
        Self::local(AckErrorKind::Timeout, "ack timeout")
    }

    pub(crate) fn channel_closed() -> Self {
        Self::local(AckErrorKind::ChannelClosed, "channel closed, nothing sent")
    }

    pub(crate) fn dropped() -> Self {
        Self::local(AckErrorKind::Dropped, "emitter dropped before ack")
    }

    pub fn kind(&self) -> AckErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The remote trace, or a local backtrace when the peer sent none.
    /// Local traces are empty unless `RUST_BACKTRACE` enables capture.
    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == AckErrorKind::Timeout
    }

    /// Envelope form, for relaying the failure across another hop.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.message.clone()).with_stack(self.stack.clone())
    }
}

impl From<&AckError> for ErrorEnvelope {
    fn from(err: &AckError) -> Self {
        err.to_envelope()
    }
}

/// Normalize a failure into its transmissible form.
pub fn wrap(failure: &Failure) -> ErrorEnvelope {
    match failure {
        Failure::Error(err) => {
            if let Some(ack) = err.downcast_ref::<AckError>() {
                return ack.to_envelope();
            }
            let envelope = ErrorEnvelope::new(err.to_string());
            match source_chain(&**err) {
                Some(chain) => envelope.with_stack(chain),
                None => envelope,
            }
        }
        Failure::Text(text) => ErrorEnvelope::new(text.clone()),
        Failure::Value(value) => wrap_value(value),
        Failure::Panic(payload) => ErrorEnvelope::new(panic_message(payload.as_ref())),
    }
}

/// Rebuild the error on the receiving side.
pub fn unwrap(envelope: ErrorEnvelope) -> AckError {
    let stack = envelope.stack.unwrap_or_else(local_trace);
    AckError {
        kind: AckErrorKind::Remote,
        message: envelope.message,
        stack,
    }
}

/// Backtrace of the current thread, or empty when `RUST_BACKTRACE` leaves
/// capture disabled.
fn local_trace() -> String {
    let trace = Backtrace::capture();
    match trace.status() {
        BacktraceStatus::Captured => trace.to_string(),
        _ => String::new(),
    }
}

fn wrap_value(value: &Value) -> ErrorEnvelope {
    match value {
        Value::String(text) => ErrorEnvelope::new(text.clone()),
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => {
                let envelope = ErrorEnvelope::new(message);
                match map.get("stack").and_then(Value::as_str) {
                    Some(stack) => envelope.with_stack(stack),
                    None => envelope,
                }
            }
            None => ErrorEnvelope::new(value.to_string()),
        },
        other => ErrorEnvelope::new(other.to_string()),
    }
}

fn source_chain(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut lines = Vec::new();
    let mut cause = err.source();
    while let Some(inner) = cause {
        lines.push(format!("caused by: {inner}"));
        cause = inner.source();
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        PANIC_FALLBACK.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn text_becomes_message_without_stack() {
        let envelope = wrap(&Failure::from("boom"));
        assert_eq!(envelope, ErrorEnvelope::new("boom"));
    }

    #[test]
    fn error_uses_display_and_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let envelope = wrap(&Failure::error(Outer(inner)));
        assert_eq!(envelope.message, "outer failure");
        assert_eq!(envelope.stack.as_deref(), Some("caused by: disk gone"));
    }

    #[test]
    fn error_without_source_has_no_stack() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "plain");
        let envelope = wrap(&Failure::from(err));
        assert_eq!(envelope.message, "plain");
        assert!(envelope.stack.is_none());
    }

    #[test]
    fn object_with_message_keeps_message_and_stack() {
        let envelope = wrap(&Failure::from(json!({"message": "bad input", "stack": "at x"})));
        assert_eq!(envelope, ErrorEnvelope::new("bad input").with_stack("at x"));
    }

    #[test]
    fn other_values_render_as_compact_json() {
        assert_eq!(wrap(&Failure::from(json!({"code": 7}))).message, r#"{"code":7}"#);
        assert_eq!(wrap(&Failure::from(json!(42))).message, "42");
        assert_eq!(wrap(&Failure::from(json!("just text"))).message, "just text");
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(wrap(&Failure::Panic(Box::new("static str"))).message, "static str");
        assert_eq!(
            wrap(&Failure::Panic(Box::new(String::from("owned")))).message,
            "owned"
        );
        assert_eq!(wrap(&Failure::Panic(Box::new(17u8))).message, PANIC_FALLBACK);
    }

    #[test]
    fn unwrap_keeps_remote_stack() {
        let err = unwrap(ErrorEnvelope::new("remote").with_stack("remote trace"));
        assert_eq!(err.kind(), AckErrorKind::Remote);
        assert_eq!(err.message(), "remote");
        assert_eq!(err.stack(), "remote trace");
        assert_eq!(err.to_string(), "remote");
    }

    #[test]
    fn unwrap_without_stack_captures_local_backtrace() {
        let err = unwrap(ErrorEnvelope::new("no trace"));
        assert_eq!(err.message(), "no trace");
        assert_eq!(err.stack().is_empty(), !backtraces_enabled());
    }

    fn backtraces_enabled() -> bool {
        Backtrace::capture().status() == BacktraceStatus::Captured
    }

    #[test]
    fn local_errors_follow_the_backtrace_setting() {
        let errors = [AckError::timeout(), AckError::channel_closed(), AckError::dropped()];
        for err in &errors {
            assert_eq!(err.stack().is_empty(), !backtraces_enabled(), "{}", err.kind());
        }
    }

    #[test]
    fn ack_error_relays_through_wrap() {
        let original = unwrap(ErrorEnvelope::new("first hop").with_stack("trace"));
        let relayed = wrap(&Failure::from(original));
        assert_eq!(relayed, ErrorEnvelope::new("first hop").with_stack("trace"));
    }

    #[test]
    fn timeout_error_shape() {
        let err = AckError::timeout();
        assert!(err.is_timeout());
        assert_eq!(err.message(), "ack timeout");
    }
}
