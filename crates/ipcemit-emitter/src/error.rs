use ipcemit_transport::EndpointId;

/// Errors returned by local [`crate::IpcEmitter`] operations.
///
/// Failures that cross the endpoint boundary are reported as
/// [`crate::AckError`] through a [`crate::Reply`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    /// A handler is already registered for this event on this endpoint.
    #[error("listener already registered for event \"{event}\" on {endpoint}")]
    DuplicateHandler { endpoint: EndpointId, event: String },

    /// The endpoint's hub has closed; nothing can be attached to it.
    #[error("{endpoint} is closed")]
    EndpointClosed { endpoint: EndpointId },

    /// The emitter was created outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

pub type Result<T> = std::result::Result<T, EmitterError>;
