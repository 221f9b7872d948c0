//! Per-endpoint side table: the event registry plus which demultiplexers
//! are attached to the endpoint's hub.
//!
//! Attachment is idempotent. Each side (SYN, ACK) has one slot holding the
//! hub listener id; the hub's removal notifications clear a slot no matter
//! who detached the listener, and the hub's close notification drops the
//! whole entry.

use std::fmt;
use std::sync::{Arc, Weak};

use ipcemit_transport::{Endpoint, EndpointId, ListenerId, MessageListener, ObserverId};
use tracing::{debug, trace};

use crate::emitter::Shared;
use crate::error::{EmitterError, Result};
use crate::events::{EventTable, Handler};

/// Which demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Inbound requests: runs handlers and sends ACKs.
    Syn,
    /// Inbound replies: settles pending calls.
    Ack,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Syn => "syn",
            Side::Ack => "ack",
        })
    }
}

#[derive(Default)]
pub(crate) struct EndpointState {
    pub(crate) events: EventTable,
    syn: Option<ListenerId>,
    ack: Option<ListenerId>,
    observers: Option<[ObserverId; 2]>,
}

impl EndpointState {
    pub(crate) fn slot(&self, side: Side) -> Option<ListenerId> {
        match side {
            Side::Syn => self.syn,
            Side::Ack => self.ack,
        }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<ListenerId> {
        match side {
            Side::Syn => &mut self.syn,
            Side::Ack => &mut self.ack,
        }
    }

    fn clear_listener(&mut self, id: ListenerId) -> Option<Side> {
        [Side::Syn, Side::Ack].into_iter().find(|side| {
            let slot = self.slot_mut(*side);
            if *slot == Some(id) {
                *slot = None;
                true
            } else {
                false
            }
        })
    }
}

impl Shared {
    /// Attach the `side` demultiplexer to `endpoint` unless one already is.
    ///
    /// `make` builds the hub listener; it is only called when attaching.
    pub(crate) fn ensure_installed<E>(
        self: &Arc<Self>,
        endpoint: &E,
        side: Side,
        make: impl FnOnce(Weak<Shared>) -> MessageListener,
    ) -> Result<()>
    where
        E: Endpoint + ?Sized,
    {
        let _serial = self.lock_install();
        let endpoint_id = endpoint.id();
        let hub = endpoint.hub();
        if hub.is_closed() {
            return Err(EmitterError::EndpointClosed {
                endpoint: endpoint_id,
            });
        }

        let needs_observers = {
            let tables = self.lock_endpoints();
            match tables.get(&endpoint_id) {
                Some(state) if state.slot(side).is_some() => return Ok(()),
                Some(state) => state.observers.is_none(),
                None => true,
            }
        };

        let observers = needs_observers.then(|| {
            let weak = Arc::downgrade(self);
            let removal = hub.on_listener_removed(Arc::new(move |lid: ListenerId| {
                if let Some(shared) = weak.upgrade() {
                    shared.listener_removed(endpoint_id, lid);
                }
            }));
            let weak = Arc::downgrade(self);
            let close = hub.on_close(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.endpoint_closed(endpoint_id);
                }
            }));
            [removal, close]
        });

        let listener = hub.add_listener(make(Arc::downgrade(self)));
        {
            let mut tables = self.lock_endpoints();
            let state = tables.entry(endpoint_id).or_default();
            if observers.is_some() {
                state.observers = observers;
            }
            *state.slot_mut(side) = Some(listener);
        }
        debug!(endpoint = %endpoint_id, %side, "demultiplexer installed");

        if hub.is_closed() {
            hub.remove_listener(listener);
            self.endpoint_closed(endpoint_id);
            return Err(EmitterError::EndpointClosed {
                endpoint: endpoint_id,
            });
        }
        Ok(())
    }

    pub(crate) fn is_installed(&self, endpoint_id: EndpointId, side: Side) -> bool {
        self.lock_endpoints()
            .get(&endpoint_id)
            .is_some_and(|state| state.slot(side).is_some())
    }

    /// Remove both demultiplexers from the hub. The slots clear through the
    /// removal observer. Handlers stay registered.
    pub(crate) fn detach<E>(&self, endpoint: &E) -> usize
    where
        E: Endpoint + ?Sized,
    {
        let _serial = self.lock_install();
        let slots: Vec<ListenerId> = {
            let tables = self.lock_endpoints();
            match tables.get(&endpoint.id()) {
                Some(state) => [state.syn, state.ack].into_iter().flatten().collect(),
                None => Vec::new(),
            }
        };
        slots
            .into_iter()
            .filter(|lid| endpoint.hub().remove_listener(*lid))
            .count()
    }

    /// Drop everything known about `endpoint` and unhook from its hub.
    pub(crate) fn forget<E>(&self, endpoint: &E) -> bool
    where
        E: Endpoint + ?Sized,
    {
        let _serial = self.lock_install();
        let Some(state) = self.lock_endpoints().remove(&endpoint.id()) else {
            return false;
        };
        let hub = endpoint.hub();
        for lid in [state.syn, state.ack].into_iter().flatten() {
            hub.remove_listener(lid);
        }
        for oid in state.observers.into_iter().flatten() {
            hub.remove_observer(oid);
        }
        debug!(endpoint = %endpoint.id(), "endpoint forgotten");
        true
    }

    pub(crate) fn add_handler(&self, endpoint_id: EndpointId, event: &str, handler: Handler) -> Result<()> {
        let mut tables = self.lock_endpoints();
        let Some(state) = tables.get_mut(&endpoint_id) else {
            return Err(EmitterError::EndpointClosed {
                endpoint: endpoint_id,
            });
        };
        if !state.events.insert(event, handler) {
            return Err(EmitterError::DuplicateHandler {
                endpoint: endpoint_id,
                event: event.to_string(),
            });
        }
        trace!(endpoint = %endpoint_id, event, handlers = state.events.len(), "handler registered");
        Ok(())
    }

    pub(crate) fn remove_handler(&self, endpoint_id: EndpointId, event: &str) -> bool {
        self.lock_endpoints()
            .get_mut(&endpoint_id)
            .is_some_and(|state| state.events.remove(event))
    }

    pub(crate) fn handler(&self, endpoint_id: EndpointId, event: &str) -> Option<Handler> {
        self.lock_endpoints()
            .get(&endpoint_id)
            .and_then(|state| state.events.get(event))
    }

    pub(crate) fn has_handler(&self, endpoint_id: EndpointId, event: &str) -> bool {
        self.lock_endpoints()
            .get(&endpoint_id)
            .is_some_and(|state| state.events.contains(event))
    }

    fn listener_removed(&self, endpoint_id: EndpointId, lid: ListenerId) {
        let cleared = self
            .lock_endpoints()
            .get_mut(&endpoint_id)
            .and_then(|state| state.clear_listener(lid));
        if let Some(side) = cleared {
            debug!(endpoint = %endpoint_id, %side, "demultiplexer detached");
        }
    }

    fn endpoint_closed(&self, endpoint_id: EndpointId) {
        let state = self.lock_endpoints().remove(&endpoint_id);
        if let Some(state) = state {
            debug!(endpoint = %endpoint_id, handlers = state.events.len(), "endpoint closed; tables dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_listener_only_touches_matching_slot() {
        let hub = ipcemit_transport::MessageHub::new();
        let noop: MessageListener = Arc::new(|_: &ipcemit_transport::Inbound| {});
        let syn = hub.add_listener(Arc::clone(&noop));
        let ack = hub.add_listener(noop);

        let mut state = EndpointState {
            syn: Some(syn),
            ack: Some(ack),
            ..EndpointState::default()
        };
        assert_eq!(state.clear_listener(ack), Some(Side::Ack));
        assert_eq!(state.slot(Side::Syn), Some(syn));
        assert_eq!(state.slot(Side::Ack), None);
        assert_eq!(state.clear_listener(ack), None);
    }
}
