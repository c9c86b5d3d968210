//! Bounded request queue between the transport and the reader loop.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SubmitError;
use crate::messages::ServerRequest;

/// Create the request queue with the given capacity.
pub fn request_queue(capacity: usize) -> (RequestQueue, RequestReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (RequestQueue { tx }, RequestReceiver { rx })
}

/// Producer half, cloned into every connection task.
///
/// Safe for concurrent enqueue from any number of producers.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<ServerRequest>,
}

impl RequestQueue {
    /// Enqueue without waiting. A full queue is the client's problem to
    /// retry, not ours to buffer.
    pub fn submit(&self, request: ServerRequest) -> Result<(), SubmitError> {
        self.tx.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Enqueue, waiting for space. For synthetic requests (e.g. the
    /// `ClientClosed` a connection injects on disconnect) that must not be
    /// lost to a momentarily full queue.
    pub async fn submit_wait(&self, request: ServerRequest) -> Result<(), SubmitError> {
        self.tx.send(request).await.map_err(|_| SubmitError::Closed)
    }
}

/// Consumer half, owned by the reader loop.
#[derive(Debug)]
pub struct RequestReceiver {
    rx: mpsc::Receiver<ServerRequest>,
}

impl RequestReceiver {
    /// Next request, or `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<ServerRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientHandle, ClientId};
    use crate::messages::Request;

    fn request(serial: u64) -> ServerRequest {
        ServerRequest {
            client: ClientHandle::channel(ClientId(1)).0,
            serial,
            request: Request::ListenToEvents,
        }
    }

    #[test]
    fn overflow_is_reported_not_dropped() {
        let (queue, _rx) = request_queue(2);
        queue.submit(request(1)).unwrap();
        queue.submit(request(2)).unwrap();
        assert_eq!(queue.submit(request(3)), Err(SubmitError::QueueFull));
    }

    #[test]
    fn closed_queue_is_distinguished_from_full() {
        let (queue, rx) = request_queue(2);
        drop(rx);
        assert_eq!(queue.submit(request(1)), Err(SubmitError::Closed));
    }
}
