use std::time::Duration;

use ipcemit_transport::SendOptions;

/// Per-send options for fire-and-forget emits.
pub type EmitOptions = SendOptions;

/// Emitter-wide acknowledgment settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckConfig {
    /// Default time to wait for an ACK. Zero disables the default timer.
    pub ack_timeout: Duration,
    /// Master switch for all ACK timers, per-call ones included.
    pub enable_ack_timeout: bool,
}

impl AckConfig {
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(60);

    /// The timer to arm for a call, if any.
    ///
    /// A per-call timeout overrides the default. Either one being zero, or
    /// timers being disabled, means the call waits indefinitely.
    pub fn effective_timeout(&self, per_call: Option<Duration>) -> Option<Duration> {
        if !self.enable_ack_timeout {
            return None;
        }
        let timeout = per_call.unwrap_or(self.ack_timeout);
        (!timeout.is_zero()).then_some(timeout)
    }
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Self::DEFAULT_ACK_TIMEOUT,
            enable_ack_timeout: true,
        }
    }
}

/// Options for [`crate::IpcEmitter::emit_async`].
#[derive(Debug, Clone, Default)]
pub struct AsyncEmitOptions {
    pub emit: EmitOptions,
    /// `None` uses [`AckConfig::ack_timeout`]; `Some(Duration::ZERO)` waits
    /// indefinitely.
    pub timeout: Option<Duration>,
}

impl AsyncEmitOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            emit: EmitOptions::default(),
            timeout: Some(timeout),
        }
    }

    /// Wait for the ACK indefinitely, regardless of the default.
    pub fn without_timeout() -> Self {
        Self::with_timeout(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_applies_when_unset() {
        let config = AckConfig::default();
        assert_eq!(config.effective_timeout(None), Some(Duration::from_secs(60)));
    }

    #[test]
    fn per_call_timeout_overrides_default() {
        let config = AckConfig::default();
        assert_eq!(
            config.effective_timeout(Some(Duration::from_millis(500))),
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.effective_timeout(Some(Duration::ZERO)), None);
    }

    #[test]
    fn disabled_timers_ignore_per_call_timeout() {
        let config = AckConfig {
            enable_ack_timeout: false,
            ..AckConfig::default()
        };
        assert_eq!(config.effective_timeout(Some(Duration::from_millis(500))), None);
    }

    #[test]
    fn zero_default_means_no_timer() {
        let config = AckConfig {
            ack_timeout: Duration::ZERO,
            enable_ack_timeout: true,
        };
        assert_eq!(config.effective_timeout(None), None);
    }
}
