use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::endpoint::Inbound;

/// Callback invoked for every inbound payload.
pub type MessageListener = Arc<dyn Fn(&Inbound) + Send + Sync>;

/// Callback invoked after a listener has been removed, with its id.
pub type RemovalObserver = Arc<dyn Fn(ListenerId) + Send + Sync>;

/// Callback invoked once when the hub closes.
pub type CloseObserver = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`MessageHub::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Handle returned by [`MessageHub::on_listener_removed`] and [`MessageHub::on_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// The inbound-message event of an endpoint.
///
/// Transports call [`MessageHub::emit`] for each payload they receive and
/// [`MessageHub::close`] once the channel is gone for good. Callbacks always
/// run outside the internal lock, so a listener may add or remove listeners
/// (including itself) while being invoked.
#[derive(Clone, Default)]
pub struct MessageHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    listeners: Vec<(ListenerId, MessageListener)>,
    removal_observers: Vec<(ObserverId, RemovalObserver)>,
    close_observers: Vec<(ObserverId, CloseObserver)>,
    closed: bool,
}

impl HubState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MessageHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to inbound payloads.
    pub fn add_listener(&self, listener: MessageListener) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.allocate());
        state.listeners.push((id, listener));
        trace!(listener = id.0, total = state.listeners.len(), "listener added");
        id
    }

    /// Unsubscribe a listener. Removal observers are notified when it was present.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let observers = {
            let mut state = self.lock();
            let Some(pos) = state.listeners.iter().position(|(lid, _)| *lid == id) else {
                return false;
            };
            state.listeners.remove(pos);
            trace!(listener = id.0, total = state.listeners.len(), "listener removed");
            snapshot(&state.removal_observers)
        };

        for observer in observers {
            observer(id);
        }
        true
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.lock().listeners.iter().any(|(lid, _)| *lid == id)
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Observe listener removals, whoever performs them.
    pub fn on_listener_removed(&self, observer: RemovalObserver) -> ObserverId {
        let mut state = self.lock();
        let id = ObserverId(state.allocate());
        state.removal_observers.push((id, observer));
        id
    }

    /// Observe the hub closing. Called immediately if it is already closed.
    pub fn on_close(&self, observer: CloseObserver) -> ObserverId {
        let id = {
            let mut state = self.lock();
            let id = ObserverId(state.allocate());
            if !state.closed {
                state.close_observers.push((id, observer));
                return id;
            }
            id
        };
        observer();
        id
    }

    /// Drop a removal or close observer.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut state = self.lock();
        let before = state.removal_observers.len() + state.close_observers.len();
        state.removal_observers.retain(|(oid, _)| *oid != id);
        state.close_observers.retain(|(oid, _)| *oid != id);
        before != state.removal_observers.len() + state.close_observers.len()
    }

    /// Deliver a payload to every current listener.
    pub fn emit(&self, inbound: Inbound) {
        let listeners = snapshot(&self.lock().listeners);
        for listener in listeners {
            listener(&inbound);
        }
    }

    /// Mark the channel permanently gone.
    ///
    /// Every listener is removed (removal observers see each one), then close
    /// observers run once. Returns `false` if the hub was already closed.
    pub fn close(&self) -> bool {
        let (removed, removal_observers, close_observers) = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            let removed: Vec<ListenerId> =
                state.listeners.drain(..).map(|(id, _)| id).collect();
            let removal_observers = snapshot(&state.removal_observers);
            let close_observers: Vec<CloseObserver> = state
                .close_observers
                .drain(..)
                .map(|(_, observer)| observer)
                .collect();
            (removed, removal_observers, close_observers)
        };

        for id in removed {
            for observer in &removal_observers {
                observer(id);
            }
        }
        for observer in close_observers {
            observer();
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl fmt::Debug for MessageHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageHub")
            .field("listeners", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}

fn snapshot<I: Copy, T: Clone>(entries: &[(I, T)]) -> Vec<T> {
    entries.iter().map(|(_, entry)| entry.clone()).collect()
}
