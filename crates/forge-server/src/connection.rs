//! Per-client TCP handler.
//!
//! Responsibilities:
//! - Read length-prefixed frames from the socket and decode them into
//!   requests via `forge-protocol`.
//! - Submit requests into the dispatcher's bounded request queue,
//!   bouncing a queue-full reply straight back when it overflows.
//! - Concurrently drain the client's outbound channel and write replies
//!   and events back as frames.
//! - On EOF or transport failure, inject a synthetic `ClientClosed` so
//!   the reader drops every subscription this client held.

use thiserror::Error;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use forge_core::{
    ClientHandle, ClientId, Request, RequestQueue, Response, ServerRequest, SubmitError,
};
use forge_protocol::{
    decode_client_message, encode_server_message, read_frame, write_frame, FrameError,
    ProtocolError,
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Run the I/O loops for a single connection until the peer goes away.
pub async fn run(
    client_id: ClientId,
    stream: TcpStream,
    requests: RequestQueue,
) -> Result<(), ConnectionError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (handle, mut out_rx) = ClientHandle::channel(client_id);

    // Writer task: drain the outbound channel into frames. It ends on its
    // own once every clone of the handle is gone.
    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let mut body = Vec::with_capacity(128);
            if let Err(err) = encode_server_message(&message, &mut body) {
                warn!(client = %client_id, error = %err, "dropping unencodable message");
                continue;
            }
            if let Err(err) = write_frame(&mut write_half, &body).await {
                debug!(client = %client_id, error = %err, "write failed; closing writer");
                break;
            }
        }
    });

    let result = read_loop(client_id, &mut read_half, &handle, &requests).await;

    // The transport is gone: unsubscribe the client everywhere. This must
    // not be lost to a momentarily full queue, so wait for space.
    let _ = requests
        .submit_wait(ServerRequest {
            client: handle.clone(),
            serial: 0,
            request: Request::ClientClosed,
        })
        .await;

    result
}

async fn read_loop(
    client_id: ClientId,
    read_half: &mut OwnedReadHalf,
    handle: &ClientHandle,
    requests: &RequestQueue,
) -> Result<(), ConnectionError> {
    loop {
        let frame = match read_frame(read_half).await? {
            Some(frame) => frame,
            // Clean EOF.
            None => return Ok(()),
        };

        let message = match decode_client_message(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(client = %client_id, error = %err, "protocol decode error; closing connection");
                return Err(err.into());
            }
        };

        let serial = message.serial;
        let request = ServerRequest {
            client: handle.clone(),
            serial,
            request: message.request,
        };

        match requests.submit(request) {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => {
                warn!(client = %client_id, serial, "request queue full");
                handle.reply(serial, Response::QueueFull);
            }
            // Dispatcher gone; nothing left to serve.
            Err(SubmitError::Closed) => return Ok(()),
        }
    }
}
