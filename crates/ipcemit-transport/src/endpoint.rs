use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::hub::MessageHub;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an endpoint.
///
/// Per-endpoint state elsewhere is keyed by this id, never by the endpoint
/// object itself, so nothing needs to be stored on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Allocate a fresh id. Transports call this once per endpoint.
    pub fn next() -> Self {
        Self(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Auxiliary handle passed alongside a payload (a socket, a server, ...).
///
/// The handle is opaque to ipcemit. Transports that can move it (in-process
/// ones) hand the same value to the receiving side; stream transports drop it.
#[derive(Clone)]
pub struct SendHandle(Arc<dyn Any + Send + Sync>);

impl SendHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True if both handles wrap the same underlying value.
    pub fn ptr_eq(&self, other: &SendHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle").finish_non_exhaustive()
    }
}

/// Per-send transport options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Auxiliary handle transmitted with the payload.
    pub send_handle: Option<SendHandle>,
    /// Ask the transport to keep the handle open on the sending side.
    ///
    /// Passed through untouched for transports that close a handle once it
    /// is sent. The in-memory transports share handles by reference and
    /// never close the sender's copy, so for them the flag changes nothing.
    /// `StreamEndpoint` cannot carry handles at all.
    pub keep_open: bool,
}

impl SendOptions {
    pub fn with_handle(handle: SendHandle) -> Self {
        Self {
            send_handle: Some(handle),
            keep_open: false,
        }
    }
}

/// A payload delivered to an endpoint, with the handle that accompanied it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub payload: Value,
    pub handle: Option<SendHandle>,
}

impl Inbound {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            handle: None,
        }
    }
}

/// One side of a duplex message channel.
pub trait Endpoint: Send + Sync + 'static {
    /// Identity used to key per-endpoint state.
    fn id(&self) -> EndpointId;

    /// OS process id of the other side, when known. Used in diagnostics.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Whether the channel is currently usable.
    fn is_connected(&self) -> bool;

    /// `false` for self-addressed endpoints that have no direct send path.
    /// Payloads for those are delivered to [`Endpoint::hub`] instead.
    fn can_transmit(&self) -> bool {
        true
    }

    /// Queue `payload` for the other side. Returns the transport's own
    /// success flag; never panics on a closed channel.
    fn transmit(&self, payload: Value, options: &SendOptions) -> bool;

    /// Subscribable inbound-message event of this endpoint.
    fn hub(&self) -> &MessageHub;
}
