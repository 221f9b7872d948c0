//! Named events and acknowledged request/reply over IPC channels.
//!
//! ipcemit turns a duplex message channel between two endpoints (a parent
//! and a child process, two tasks, two ends of a Unix socket) into an event
//! bus where any emit can optionally wait for the handler's reply.
//!
//! # Crate Structure
//!
//! - [`transport`] — Endpoint abstraction and reference transports
//! - [`frame`] — SYN/ACK wire frames and length-prefixed JSON framing
//! - [`emitter`] — The ack-correlating emitter (behind `emitter` feature)
//! - [`logging`] — Stderr tracing setup for binaries (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipcemit_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipcemit_frame::*;
}

/// Re-export emitter types (requires `emitter` feature).
#[cfg(feature = "emitter")]
pub mod emitter {
    pub use ipcemit_emitter::*;
}

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "emitter")]
pub use ipcemit_emitter::{AckConfig, AckError, AsyncEmitOptions, EmitOptions, IpcEmitter, Reply};
