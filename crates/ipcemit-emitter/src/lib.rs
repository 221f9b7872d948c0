//! Ack-correlated event emitter for ipcemit endpoints.
//!
//! [`IpcEmitter`] layers named events and request/acknowledgment calls on
//! top of any [`ipcemit_transport::Endpoint`]:
//!
//! - `emit`/`send` write a SYN frame and return immediately.
//! - `emit_async`/`send_async` tag the SYN frame with a correlation id and
//!   return a [`Reply`] that resolves when the matching ACK arrives, the
//!   timeout fires, or the call is reaped.
//! - `add_listener`/`once` register the single handler for an event on an
//!   endpoint. Handlers are async and may fail; failures travel back to the
//!   caller as [`AckError`].
//!
//! The inbound side of an endpoint is served by two demultiplexers attached
//! to its hub at most once each, on first need.

mod demux;
mod dispatch;
mod emitter;
mod install;

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod pending;
pub mod sequence;

pub use config::{AckConfig, AsyncEmitOptions, EmitOptions};
pub use emitter::{IpcEmitter, Reply};
pub use envelope::{AckError, AckErrorKind, Failure};
pub use error::{EmitterError, Result};
pub use events::{handler, Handler, HandlerResult};
pub use install::Side;
pub use pending::PendingRegistry;
pub use sequence::Sequence;
