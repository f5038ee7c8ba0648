//! Per-consumer views of the shared event stream.
//!
//! Chat and terminal consumers share one connection but must never see each
//! other's frames. Lifecycle events reach everyone.

use crate::subscribers::Subscription;
use crate::transport::{TransportEvent, TransportManager};
use agent_stream::SubProtocol;

pub fn accepts(family: SubProtocol, event: &TransportEvent) -> bool {
    match event {
        TransportEvent::Frame(envelope) => envelope.entity.sub_protocol() == family,
        TransportEvent::Open | TransportEvent::Error(_) | TransportEvent::Close => true,
    }
}

/// Subscribe to lifecycle events plus the frames of one sub-protocol.
pub fn subscribe_family<F>(
    transport: &TransportManager,
    family: SubProtocol,
    callback: F,
) -> Subscription
where
    F: Fn(&TransportEvent) + Send + Sync + 'static,
{
    transport.subscribe(move |event| {
        if accepts(family, event) {
            callback(event);
        }
    })
}
