use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures_util::future::{self, FutureExt};
use ipcemit_frame::{AckFrame, CorrelationId, SynFrame, WireFrame};
use ipcemit_transport::{Endpoint, EndpointId, Inbound, MessageListener, SendOptions};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::dispatch::dispatch;
use crate::emitter::Shared;
use crate::envelope::{self, Failure};
use crate::events::HandlerResult;
use crate::pending::PendingRegistry;

/// Hub listener that runs handlers for inbound SYN frames on `endpoint`.
pub(crate) fn syn_listener<E>(shared: Weak<Shared>, endpoint: Weak<E>, endpoint_id: EndpointId) -> MessageListener
where
    E: Endpoint + ?Sized,
{
    Arc::new(move |inbound: &Inbound| {
        if let Some(shared) = shared.upgrade() {
            on_syn(&shared, &endpoint, endpoint_id, inbound);
        }
    })
}

/// Hub listener that settles pending calls from inbound ACK frames.
pub(crate) fn ack_listener(shared: Weak<Shared>) -> MessageListener {
    Arc::new(move |inbound: &Inbound| {
        if let Some(shared) = shared.upgrade() {
            on_ack(&shared.pending, &inbound.payload);
        }
    })
}

fn on_syn<E>(shared: &Shared, endpoint: &Weak<E>, endpoint_id: EndpointId, inbound: &Inbound)
where
    E: Endpoint + ?Sized,
{
    let Some(WireFrame::Syn(frame)) = WireFrame::from_value(&inbound.payload) else {
        return;
    };
    let SynFrame { ack, event, message } = frame;

    let Some(handler) = shared.handler(endpoint_id, &event) else {
        match ack {
            Some(ack) => {
                debug!(endpoint = %endpoint_id, %event, %ack, "no listener; replying with error");
                let failure = Failure::Text(format!("no listener registered for event \"{event}\""));
                reply(&shared.runtime, endpoint, ack, Err(failure));
            }
            None => warn!(endpoint = %endpoint_id, %event, "no listener registered for event"),
        }
        return;
    };

    let invoked = panic::catch_unwind(AssertUnwindSafe(|| handler(message, inbound.handle.clone())));
    let pending = match invoked {
        Ok(fut) => fut,
        Err(payload) => future::ready(Err(Failure::Panic(payload))).boxed(),
    };

    let runtime = shared.runtime.clone();
    let endpoint = endpoint.clone();
    shared.runtime.spawn(async move {
        let outcome = match AssertUnwindSafe(pending).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(Failure::Panic(payload)),
        };
        match ack {
            Some(ack) => reply(&runtime, &endpoint, ack, outcome),
            None => {
                if let Err(failure) = outcome {
                    warn!(
                        endpoint = %endpoint_id,
                        %event,
                        error = %failure,
                        "uncaught failure in non-ack event listener"
                    );
                }
            }
        }
    });
}

/// Send exactly one ACK for `ack` carrying the handler outcome.
fn reply<E>(runtime: &Handle, endpoint: &Weak<E>, ack: CorrelationId, outcome: HandlerResult)
where
    E: Endpoint + ?Sized,
{
    let frame = match outcome {
        Ok(value) => AckFrame::success(ack, value),
        Err(failure) => AckFrame::failure(ack, envelope::wrap(&failure)),
    };
    let Some(endpoint) = endpoint.upgrade() else {
        debug!(%ack, "endpoint dropped before ack could be sent");
        return;
    };
    if !dispatch(runtime, &*endpoint, frame.into_value(), &SendOptions::default()) {
        debug!(endpoint = %endpoint.id(), %ack, "ack not delivered");
    }
}

fn on_ack(pending: &PendingRegistry, payload: &Value) {
    let Some(WireFrame::Ack(frame)) = WireFrame::from_value(payload) else {
        return;
    };
    let AckFrame { ack, message, error } = frame;
    let settled = match error {
        Some(error) => pending.reject(ack, envelope::unwrap(error)),
        None => pending.resolve(ack, message.unwrap_or(Value::Null)),
    };
    if !settled {
        debug!(%ack, "ack for unknown or already settled call");
    }
}
