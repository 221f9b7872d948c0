//! Endpoint abstraction for ipcemit.
//!
//! The emitter never talks to sockets or processes directly. It talks to an
//! [`Endpoint`]: something that reports whether it is connected, transmits a
//! JSON payload (optionally with an auxiliary [`SendHandle`]), and delivers
//! inbound payloads through its [`MessageHub`].
//!
//! Reference transports:
//! - [`LocalEndpoint`]: the current process talking to itself
//! - [`ChannelEndpoint`]: an in-memory connected pair (parent/child stand-in)
//! - [`StreamEndpoint`] / [`UdsListener`]: Unix domain sockets (Linux/macOS)

pub mod channel;
pub mod endpoint;
pub mod error;
pub mod hub;
pub mod local;

#[cfg(unix)]
pub mod uds;

pub use channel::ChannelEndpoint;
pub use endpoint::{Endpoint, EndpointId, Inbound, SendHandle, SendOptions};
pub use error::{Result, TransportError};
pub use hub::{CloseObserver, ListenerId, MessageHub, MessageListener, ObserverId, RemovalObserver};
pub use local::LocalEndpoint;

#[cfg(unix)]
pub use uds::{StreamEndpoint, UdsListener};
