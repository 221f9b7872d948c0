use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use futures_util::future::{self, FutureExt};
use ipcemit_frame::{CorrelationId, SynFrame, DEFAULT_EVENT};
use ipcemit_transport::{Endpoint, EndpointId, SendHandle};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::{AckConfig, AsyncEmitOptions, EmitOptions};
use crate::demux;
use crate::dispatch::dispatch;
use crate::envelope::{AckError, Failure};
use crate::error::Result;
use crate::events::{self, Handler};
use crate::install::{EndpointState, Side};
use crate::pending::PendingRegistry;
use crate::sequence::Sequence;

/// Named-event emitter with acknowledged calls.
///
/// One emitter owns a table of pending calls, shared by every endpoint it
/// talks to. Correlation ids come from the process-wide
/// [`Sequence::global`], so emitters sharing an endpoint never settle each
/// other's calls. Handler tables are kept per endpoint and dropped when the
/// endpoint's hub closes.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct IpcEmitter {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) runtime: Handle,
    config: Mutex<AckConfig>,
    pub(crate) pending: Arc<PendingRegistry>,
    endpoints: Mutex<HashMap<EndpointId, EndpointState>>,
    install: Mutex<()>,
}

impl Shared {
    pub(crate) fn lock_endpoints(&self) -> MutexGuard<'_, HashMap<EndpointId, EndpointState>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes attach/detach so two callers never both attach a side.
    pub(crate) fn lock_install(&self) -> MutexGuard<'_, ()> {
        self.install.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> MutexGuard<'_, AckConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let dropped = self.pending.drain();
        if dropped > 0 {
            debug!(dropped, "emitter dropped with calls still pending");
        }
    }
}

impl IpcEmitter {
    /// Create an emitter bound to the current tokio runtime.
    pub fn new(config: AckConfig) -> Result<Self> {
        Ok(Self::with_runtime(config, Handle::try_current()?))
    }

    /// Create an emitter that spawns its tasks on `runtime`.
    pub fn with_runtime(config: AckConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                runtime,
                config: Mutex::new(config),
                pending: Arc::new(PendingRegistry::new()),
                endpoints: Mutex::new(HashMap::new()),
                install: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> AckConfig {
        *self.shared.config()
    }

    /// Change the default ACK timeout. Calls already pending keep their timer.
    pub fn set_ack_timeout(&self, timeout: Duration) {
        self.shared.config().ack_timeout = timeout;
    }

    pub fn set_ack_timeout_enabled(&self, enabled: bool) {
        self.shared.config().enable_ack_timeout = enabled;
    }

    /// Fire-and-forget `event` to the other side of `endpoint`.
    ///
    /// Returns whether the frame was handed to the transport.
    pub fn emit<E>(&self, endpoint: &E, event: &str, message: Value, options: &EmitOptions) -> bool
    where
        E: Endpoint + ?Sized,
    {
        trace!(endpoint = %endpoint.id(), event, "emit");
        let frame = SynFrame::new(event, message);
        dispatch(&self.shared.runtime, endpoint, frame.into_value(), options)
    }

    /// [`IpcEmitter::emit`] on the default `"message"` event.
    pub fn send<E>(&self, endpoint: &E, message: Value, options: &EmitOptions) -> bool
    where
        E: Endpoint + ?Sized,
    {
        self.emit(endpoint, DEFAULT_EVENT, message, options)
    }

    /// Emit `event` and wait for the peer's ACK.
    ///
    /// The returned [`Reply`] resolves with the peer handler's value, or with
    /// an [`AckError`] for a remote failure, a timeout, or a channel that was
    /// closed at dispatch time. Dropping the `Reply` early cancels the call.
    pub fn emit_async<E>(&self, endpoint: &E, event: &str, message: Value, options: &AsyncEmitOptions) -> Reply
    where
        E: Endpoint + ?Sized,
    {
        let shared = &self.shared;
        if let Err(err) = shared.ensure_installed(endpoint, Side::Ack, demux::ack_listener) {
            debug!(endpoint = %endpoint.id(), event, error = %err, "cannot await ack");
            return Reply::ready(Err(AckError::channel_closed()));
        }

        let id = Sequence::global().next();
        let (completion, outcome) = oneshot::channel();
        shared.pending.register(id, completion);
        if let Some(timeout) = self.config().effective_timeout(options.timeout) {
            shared.pending.start_timer(&shared.runtime, id, timeout);
        }

        trace!(endpoint = %endpoint.id(), event, ack = %id, "emit_async");
        let frame = SynFrame::with_ack(event, message, id);
        if !dispatch(&shared.runtime, endpoint, frame.into_value(), &options.emit) {
            shared.pending.reject(id, AckError::channel_closed());
        }
        Reply {
            id: Some(id),
            outcome,
            pending: Arc::downgrade(&shared.pending),
            settled: false,
        }
    }

    /// [`IpcEmitter::emit_async`] on the default `"message"` event.
    pub fn send_async<E>(&self, endpoint: &E, message: Value, options: &AsyncEmitOptions) -> Reply
    where
        E: Endpoint + ?Sized,
    {
        self.emit_async(endpoint, DEFAULT_EVENT, message, options)
    }

    /// Register the handler for `event` on `endpoint`.
    ///
    /// The handler receives the message and any auxiliary handle that came
    /// with it. Its value (or failure) is sent back when the peer asked for
    /// an ACK. Fails with `DuplicateHandler` if `event` already has one.
    pub fn add_listener<E, F, Fut, Fail>(&self, endpoint: &Arc<E>, event: &str, handler: F) -> Result<()>
    where
        E: Endpoint + ?Sized,
        F: Fn(Value, Option<SendHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, Fail>> + Send + 'static,
        Fail: Into<Failure> + 'static,
    {
        self.add_handler(endpoint, event, events::handler(handler))
    }

    /// Alias of [`IpcEmitter::add_listener`].
    pub fn on<E, F, Fut, Fail>(&self, endpoint: &Arc<E>, event: &str, handler: F) -> Result<()>
    where
        E: Endpoint + ?Sized,
        F: Fn(Value, Option<SendHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, Fail>> + Send + 'static,
        Fail: Into<Failure> + 'static,
    {
        self.add_listener(endpoint, event, handler)
    }

    /// Register a handler that unregisters itself on first invocation.
    pub fn once<E, F, Fut, Fail>(&self, endpoint: &Arc<E>, event: &str, handler: F) -> Result<()>
    where
        E: Endpoint + ?Sized,
        F: Fn(Value, Option<SendHandle>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, Fail>> + Send + 'static,
        Fail: Into<Failure> + 'static,
    {
        let inner = events::handler(handler);
        let fired = AtomicBool::new(false);
        let shared = Arc::downgrade(&self.shared);
        let endpoint_id = endpoint.id();
        let name = event.to_string();

        let wrapper: Handler = Arc::new(move |message: Value, handle: Option<SendHandle>| {
            if fired.swap(true, Ordering::AcqRel) {
                let failure = Failure::Text(format!("once listener for \"{name}\" invoked twice"));
                return future::ready(Err(failure)).boxed();
            }
            if let Some(shared) = shared.upgrade() {
                shared.remove_handler(endpoint_id, &name);
            }
            inner(message, handle)
        });
        self.add_handler(endpoint, event, wrapper)
    }

    /// Register an already type-erased handler. See [`events::handler`].
    pub fn add_handler<E>(&self, endpoint: &Arc<E>, event: &str, handler: Handler) -> Result<()>
    where
        E: Endpoint + ?Sized,
    {
        self.ensure_installed(endpoint, Side::Syn)?;
        self.shared.add_handler(endpoint.id(), event, handler)
    }

    /// Unregister the handler for `event`. Returns `false` if there was none.
    pub fn remove_listener<E>(&self, endpoint: &E, event: &str) -> bool
    where
        E: Endpoint + ?Sized,
    {
        self.shared.remove_handler(endpoint.id(), event)
    }

    pub fn has_listener<E>(&self, endpoint: &E, event: &str) -> bool
    where
        E: Endpoint + ?Sized,
    {
        self.shared.has_handler(endpoint.id(), event)
    }

    /// Attach the `side` demultiplexer to `endpoint` if it is not attached yet.
    pub fn ensure_installed<E>(&self, endpoint: &Arc<E>, side: Side) -> Result<()>
    where
        E: Endpoint + ?Sized,
    {
        match side {
            Side::Ack => self.shared.ensure_installed(&**endpoint, side, demux::ack_listener),
            Side::Syn => {
                let weak = Arc::downgrade(endpoint);
                let endpoint_id = endpoint.id();
                self.shared.ensure_installed(&**endpoint, side, move |shared| {
                    demux::syn_listener(shared, weak, endpoint_id)
                })
            }
        }
    }

    pub fn is_installed<E>(&self, endpoint: &E, side: Side) -> bool
    where
        E: Endpoint + ?Sized,
    {
        self.shared.is_installed(endpoint.id(), side)
    }

    /// Remove both demultiplexers from `endpoint`'s hub, keeping handlers.
    ///
    /// They are attached again by the next registration or `emit_async`.
    pub fn detach<E>(&self, endpoint: &E) -> usize
    where
        E: Endpoint + ?Sized,
    {
        self.shared.detach(endpoint)
    }

    /// Drop all handlers and hub hooks for `endpoint`.
    pub fn forget<E>(&self, endpoint: &E) -> bool
    where
        E: Endpoint + ?Sized,
    {
        self.shared.forget(endpoint)
    }

    /// Reject every pending call at least `max_age` old with a timeout error.
    pub fn reap(&self, max_age: Duration) -> usize {
        self.shared.pending.sweep(max_age)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        self.shared.pending.ids()
    }

    /// Number of endpoints with handler or install state.
    pub fn endpoint_count(&self) -> usize {
        self.shared.lock_endpoints().len()
    }
}

impl std::fmt::Debug for IpcEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcEmitter")
            .field("config", &self.config())
            .field("pending", &self.pending_count())
            .field("endpoints", &self.endpoint_count())
            .finish()
    }
}

/// Outcome of an [`IpcEmitter::emit_async`] call.
///
/// Dropping it before it completes removes the pending call; a late ACK is
/// then ignored.
#[must_use = "dropping a Reply cancels the call"]
pub struct Reply {
    id: Option<CorrelationId>,
    outcome: oneshot::Receiver<std::result::Result<Value, AckError>>,
    pending: Weak<PendingRegistry>,
    settled: bool,
}

impl Reply {
    fn ready(outcome: std::result::Result<Value, AckError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self {
            id: None,
            outcome: rx,
            pending: Weak::new(),
            settled: false,
        }
    }

    /// Correlation id of the call; `None` if it was never dispatched.
    pub fn id(&self) -> Option<CorrelationId> {
        self.id
    }
}

impl Future for Reply {
    type Output = std::result::Result<Value, AckError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = ready!(Pin::new(&mut self.outcome).poll(cx));
        self.settled = true;
        Poll::Ready(received.unwrap_or_else(|_| Err(AckError::dropped())))
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let (Some(id), Some(pending)) = (self.id, self.pending.upgrade()) {
            pending.cancel(id);
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}
