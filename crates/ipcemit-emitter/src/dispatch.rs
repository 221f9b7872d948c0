use ipcemit_transport::{Endpoint, Inbound, SendOptions};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{trace, warn};

/// Write one frame to `endpoint`.
///
/// Self-addressed endpoints get the payload on their own hub on the next
/// scheduler tick. Otherwise the transport's own success flag is returned,
/// or `false` with a warning when the channel is not connected.
pub(crate) fn dispatch<E>(runtime: &Handle, endpoint: &E, payload: Value, options: &SendOptions) -> bool
where
    E: Endpoint + ?Sized,
{
    if !endpoint.can_transmit() {
        let hub = endpoint.hub().clone();
        let inbound = Inbound {
            payload,
            handle: options.send_handle.clone(),
        };
        trace!(endpoint = %endpoint.id(), "delivering to own hub");
        runtime.spawn(async move {
            tokio::task::yield_now().await;
            hub.emit(inbound);
        });
        return true;
    }

    if endpoint.is_connected() {
        return endpoint.transmit(payload, options);
    }

    match endpoint.pid() {
        Some(pid) => warn!(endpoint = %endpoint.id(), pid, "channel closed, nothing sent"),
        None => warn!(endpoint = %endpoint.id(), "channel closed, nothing sent"),
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use ipcemit_transport::{ChannelEndpoint, LocalEndpoint, MessageHub, SendHandle};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn forward(hub: &MessageHub) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.add_listener(Arc::new(move |inbound: &Inbound| {
            let _ = tx.send(inbound.clone());
        }));
        rx
    }

    #[tokio::test]
    async fn self_addressed_delivery_is_deferred() {
        let local = LocalEndpoint::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        local.hub().add_listener(Arc::new(move |inbound: &Inbound| {
            sink.lock().unwrap().push(inbound.payload.clone());
        }));

        let handle = SendHandle::new("socket");
        let sent = dispatch(
            &Handle::current(),
            &local,
            json!("self"),
            &SendOptions::with_handle(handle),
        );
        assert!(sent);
        assert!(seen.lock().unwrap().is_empty(), "delivery must not be synchronous");

        let mut rx = forward(local.hub());
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.payload, json!("self"));
        assert!(inbound.handle.is_some());
        assert_eq!(*seen.lock().unwrap(), vec![json!("self")]);
    }

    #[tokio::test]
    async fn connected_endpoint_transmits() {
        let (parent, child) = ChannelEndpoint::pair();
        let mut rx = forward(child.hub());

        assert!(dispatch(&Handle::current(), &*parent, json!({"n": 1}), &SendOptions::default()));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn disconnected_endpoint_reports_false() {
        let (parent, child) = ChannelEndpoint::pair();
        child.disconnect();
        assert!(!dispatch(&Handle::current(), &*parent, json!(1), &SendOptions::default()));
    }
}
