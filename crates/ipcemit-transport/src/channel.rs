use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::endpoint::{Endpoint, EndpointId, Inbound, SendOptions};
use crate::hub::MessageHub;

/// One side of an in-memory duplex channel.
///
/// Stands in for a parent/child pair inside a single process: each side
/// has its own hub, and a pump task per side moves payloads across. Handles
/// pass through unchanged.
pub struct ChannelEndpoint {
    id: EndpointId,
    hub: MessageHub,
    outbound: mpsc::UnboundedSender<Inbound>,
    link: Arc<Link>,
}

struct Link {
    connected: AtomicBool,
    shutdown: CancellationToken,
    hubs: [MessageHub; 2],
}

impl Link {
    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("in-memory channel disconnected");
            self.shutdown.cancel();
            for hub in &self.hubs {
                hub.close();
            }
        }
    }
}

impl ChannelEndpoint {
    /// Create two connected endpoints.
    ///
    /// Must be called from within a tokio runtime: the pump tasks are
    /// spawned on it.
    pub fn pair() -> (Arc<ChannelEndpoint>, Arc<ChannelEndpoint>) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        let left_hub = MessageHub::new();
        let right_hub = MessageHub::new();

        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            hubs: [left_hub.clone(), right_hub.clone()],
        });

        tokio::spawn(pump(left_rx, left_hub.clone(), Arc::clone(&link)));
        tokio::spawn(pump(right_rx, right_hub.clone(), Arc::clone(&link)));

        let left = ChannelEndpoint {
            id: EndpointId::next(),
            hub: left_hub,
            outbound: right_tx,
            link: Arc::clone(&link),
        };
        let right = ChannelEndpoint {
            id: EndpointId::next(),
            hub: right_hub,
            outbound: left_tx,
            link,
        };
        (Arc::new(left), Arc::new(right))
    }

    /// Tear down both sides. Both hubs close.
    pub fn disconnect(&self) {
        self.link.disconnect();
    }
}

async fn pump(mut inbound: mpsc::UnboundedReceiver<Inbound>, hub: MessageHub, link: Arc<Link>) {
    loop {
        tokio::select! {
            _ = link.shutdown.cancelled() => break,
            next = inbound.recv() => match next {
                Some(message) => hub.emit(message),
                None => {
                    link.disconnect();
                    break;
                }
            },
        }
    }
}

impl Endpoint for ChannelEndpoint {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    fn transmit(&self, payload: Value, options: &SendOptions) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound
            .send(Inbound {
                payload,
                handle: options.send_handle.clone(),
            })
            .is_ok()
    }

    fn hub(&self) -> &MessageHub {
        &self.hub
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        self.link.disconnect();
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
