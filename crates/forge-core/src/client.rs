//! Per-connection client handles.
//!
//! A [`ClientHandle`] is how the dispatcher talks back to one connected
//! client. It is a lightweight value: an identity plus the sending half of
//! that client's outbound channel. Handles compare and hash by identity
//! only, so the same connection is one listener no matter how many clones
//! of its handle are floating around.

use std::fmt;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;

use crate::messages::{Event, Response, ServerMessage};

/// Identifier for a connected client.
///
/// Intentionally opaque; uniqueness over the lifetime of the process is
/// the only guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outbound messages from the dispatcher to a given client.
pub type OutboundTx = mpsc::UnboundedSender<ServerMessage>;
pub type OutboundRx = mpsc::UnboundedReceiver<ServerMessage>;

/// Handle for sending events and replies to one client.
///
/// Both [`send`](ClientHandle::send) and [`reply`](ClientHandle::reply) are
/// non-blocking: messages land in the client's unbounded outbound queue and
/// the transport writer drains it at its own pace. A slow client never
/// stalls the dispatcher. Delivery per client is FIFO.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    out: OutboundTx,
}

impl ClientHandle {
    pub fn new(id: ClientId, out: OutboundTx) -> Self {
        ClientHandle { id, out }
    }

    /// Create a handle together with the receiving half of its outbound
    /// channel, for the transport writer (or a test) to drain.
    pub fn channel(id: ClientId) -> (Self, OutboundRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new(id, tx), rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Fire-and-forget event delivery. A closed transport is not an error
    /// here; the disconnect is handled via `ClientClosed`.
    pub fn send(&self, event: Event) {
        let _ = self.out.send(ServerMessage::Event { event });
    }

    /// Correlated reply delivery.
    pub fn reply(&self, serial: u64, response: Response) {
        let _ = self.out.send(ServerMessage::Reply { serial, response });
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientHandle {}

impl Hash for ClientHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_identity() {
        let (a1, _rx1) = ClientHandle::channel(ClientId(1));
        let (a2, _rx2) = ClientHandle::channel(ClientId(1));
        let (b, _rx3) = ClientHandle::channel(ClientId(2));

        // Same id, different channels: still the same client.
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn send_and_reply_preserve_order() {
        let (client, mut rx) = ClientHandle::channel(ClientId(7));
        client.send(Event::NowListening);
        client.reply(3, Response::QueueFull);

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Event {
                event: Event::NowListening
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::Reply {
                serial: 3,
                response: Response::QueueFull
            }
        );
    }
}
