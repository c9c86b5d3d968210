//! TCP listener and top-level server wiring.
//!
//! This module:
//! - Binds a TCP listener (with simple port retry).
//! - Wires up the dispatcher around the given build engine.
//! - Spawns the reader task and the engine thread.
//! - Accepts connections, assigns each a `ClientId`, and spawns a
//!   per-client I/O task.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use forge_core::{dispatcher, BuildEngine, ClientId, Dispatcher};

use crate::config::Config;
use crate::connection;

/// Global-ish counter for assigning unique `ClientId`s.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Max number of times we'll try to bump the port if it's in use.
const MAX_PORT_RETRIES: u16 = 3;

/// Run the TCP server with the given configuration and engine.
///
/// Returns after ctrl-c. The engine runs on a dedicated thread because
/// build commands are long and synchronous; everything else is tasks.
pub async fn run<E: BuildEngine>(mut config: Config, engine: E) -> io::Result<()> {
    let (listener, port) = bind_with_retry(&config).await?;
    config.port = port;

    info!(
        addr = %config.socket_addr_string(),
        max_clients = config.max_clients,
        request_queue = config.dispatcher.request_queue_capacity,
        work_queue = config.dispatcher.work_raw_capacity,
        "forge server listening"
    );

    let Dispatcher {
        requests,
        reader,
        engine: engine_loop,
        work: _work,
        server_state: _server_state,
    } = dispatcher(engine, config.dispatcher.clone());

    tokio::spawn(reader.run());
    let _engine_thread = std::thread::Builder::new()
        .name("forge-engine".to_string())
        .spawn(move || {
            if let Err(err) = engine_loop.run() {
                error!(error = %err, "engine loop terminated");
            }
        })?;

    let connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;

                if connections.load(Ordering::Acquire) >= config.max_clients {
                    warn!(%peer, max_clients = config.max_clients, "rejecting connection");
                    // Just drop the stream; the client sees the close.
                    continue;
                }

                let client_id = next_client_id();
                info!(client = %client_id, %peer, "accepted connection");
                connections.fetch_add(1, Ordering::AcqRel);

                let requests = requests.clone();
                let connections = connections.clone();
                tokio::spawn(async move {
                    match connection::run(client_id, stream, requests).await {
                        Ok(()) => info!(client = %client_id, "disconnected"),
                        Err(err) => {
                            warn!(client = %client_id, error = %err, "connection ended with error");
                        }
                    }
                    connections.fetch_sub(1, Ordering::AcqRel);
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

/// Try to bind, bumping the port by +1 on `AddrInUse`, up to
/// `MAX_PORT_RETRIES` attempts.
async fn bind_with_retry(config: &Config) -> io::Result<(TcpListener, u16)> {
    let mut port = config.port;
    let mut attempts: u16 = 0;

    loop {
        attempts += 1;
        let addr = format!("{}:{}", config.bind_addr, port);
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                if attempts > 1 {
                    warn!(%addr, attempts, "bound after port bump");
                }
                return Ok((listener, port));
            }
            Err(err) if err.kind() == io::ErrorKind::AddrInUse && attempts < MAX_PORT_RETRIES => {
                warn!(%addr, attempt = attempts, "port in use, trying the next one");
                port += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
