use serde_json::Value;

use crate::endpoint::{Endpoint, EndpointId, Inbound, SendOptions};
use crate::hub::MessageHub;

/// The current process, addressed as an endpoint.
///
/// It has no direct send path: anything sent to it is delivered to its own
/// hub, which is how a process emits events to itself.
#[derive(Debug)]
pub struct LocalEndpoint {
    id: EndpointId,
    hub: MessageHub,
}

impl LocalEndpoint {
    pub fn new() -> Self {
        Self {
            id: EndpointId::next(),
            hub: MessageHub::new(),
        }
    }
}

impl Default for LocalEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for LocalEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    fn is_connected(&self) -> bool {
        !self.hub.is_closed()
    }

    fn can_transmit(&self) -> bool {
        false
    }

    /// Delivers synchronously to the own hub.
    fn transmit(&self, payload: Value, options: &SendOptions) -> bool {
        self.hub.emit(Inbound {
            payload,
            handle: options.send_handle.clone(),
        });
        true
    }

    fn hub(&self) -> &MessageHub {
        &self.hub
    }
}
