//! The reader loop: classifies and services client requests.
//!
//! A single task owns the consumer side of the request queue and all
//! listener bookkeeping. It runs in three phases:
//!
//! 1. **Pre-build.** Until the engine publishes its first build state, the
//!    reader polls the request queue with a timeout so it can notice the
//!    build coming up. Event subscriptions and disconnects are bookkept
//!    immediately, executions are forwarded (they run once the engine is
//!    up), and everything state-dependent is parked in a bounded deferred
//!    buffer.
//! 2. **Boot handover.** Once the build state appears, every event
//!    listener gets `NowListening` and the deferred buffer is replayed in
//!    order.
//! 3. **Steady state.** Block on the queue and dispatch each request. A
//!    failing handler produces an error reply to the originating client;
//!    the reader itself never dies.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::build::{BuildState, ResolvedKey, StateError};
use crate::cancel::LastCommandCell;
use crate::config::DispatcherConfig;
use crate::error::SubmitError;
use crate::messages::{Event, Request, Response, ServerRequest};
use crate::request_queue::RequestReceiver;
use crate::state::{BuildStateCell, ServerState, ServerStateCell};
use crate::work::WorkQueue;

/// Why a single request could not be serviced. Mapped to a reply to the
/// originating client; never fatal to the reader.
#[derive(Debug, Error)]
enum HandlerError {
    #[error("work queue to the engine is full")]
    WorkQueueFull,

    #[error("engine is shutting down")]
    EngineClosed,

    #[error("build state is not available")]
    BuildUnavailable,

    #[error(transparent)]
    State(#[from] StateError),
}

/// The reader loop. `S` is the engine's build-state type.
#[derive(Debug)]
pub struct Reader<S> {
    requests: RequestReceiver,
    server_state: Arc<ServerStateCell>,
    build_state: Arc<BuildStateCell<S>>,
    work: WorkQueue,
    last_command: LastCommandCell,
    config: DispatcherConfig,
}

impl<S: BuildState> Reader<S> {
    pub fn new(
        requests: RequestReceiver,
        server_state: Arc<ServerStateCell>,
        build_state: Arc<BuildStateCell<S>>,
        work: WorkQueue,
        last_command: LastCommandCell,
        config: DispatcherConfig,
    ) -> Self {
        Reader {
            requests,
            server_state,
            build_state,
            work,
            last_command,
            config,
        }
    }

    /// Run until the request queue closes.
    pub async fn run(mut self) {
        let deferred = match self.pre_build_phase().await {
            Some(deferred) => deferred,
            None => {
                info!("request queue closed before the build came up; reader exiting");
                return;
            }
        };

        self.boot_handover(deferred);
        self.steady_state().await;
        info!("request queue closed; reader exiting");
    }

    /// Phase 1. Returns the deferred buffer, or `None` if the queue
    /// closed before the build came up.
    async fn pre_build_phase(&mut self) -> Option<Vec<ServerRequest>> {
        let mut deferred: Vec<ServerRequest> = Vec::new();

        while !self.build_state.is_published() {
            match tokio::time::timeout(self.config.boot_poll_interval, self.requests.recv()).await
            {
                // Poll timeout: go around and re-check the build state.
                Err(_elapsed) => continue,
                Ok(None) => return None,
                Ok(Some(request)) => self.handle_pre_build(request, &mut deferred),
            }
        }

        Some(deferred)
    }

    fn handle_pre_build(&mut self, request: ServerRequest, deferred: &mut Vec<ServerRequest>) {
        match request.request {
            // Registered now, greeted later: `NowListening` goes out at
            // boot handover.
            Request::ListenToEvents => {
                self.update_state(|s| s.add_event_listener(request.client));
            }
            Request::ClientClosed => {
                self.update_state(|s| s.disconnect(&request.client));
            }
            // Executions queue up behind the engine's initial load.
            Request::Execution { .. } => self.dispatch(request),
            _ => {
                if deferred.len() >= self.config.deferred_startup_capacity {
                    warn!(
                        client = %request.client.id(),
                        serial = request.serial,
                        "deferred startup buffer full; rejecting request"
                    );
                    request.client.reply(request.serial, Response::QueueFull);
                } else {
                    debug!(
                        client = %request.client.id(),
                        serial = request.serial,
                        "deferring request until the build is up"
                    );
                    deferred.push(request);
                }
            }
        }
    }

    /// Phase 2: greet listeners and replay the deferred buffer in order.
    fn boot_handover(&mut self, deferred: Vec<ServerRequest>) {
        let state = self.server_state.snapshot();
        state.notify_event_listeners(Event::NowListening);
        info!(deferred = deferred.len(), "build is up; replaying deferred requests");
        for request in deferred {
            self.dispatch(request);
        }
    }

    /// Phase 3.
    async fn steady_state(&mut self) {
        while let Some(request) = self.requests.recv().await {
            self.dispatch(request);
        }
    }

    /// Handle one request, turning any failure into a reply.
    fn dispatch(&mut self, request: ServerRequest) {
        let client = request.client.clone();
        let serial = request.serial;

        match self.handle(request) {
            Ok(()) => {}
            Err(HandlerError::WorkQueueFull) => {
                warn!(client = %client.id(), serial, "work queue full");
                client.reply(serial, Response::QueueFull);
            }
            Err(err) => {
                error!(client = %client.id(), serial, error = %err, "request handler failed");
                client.reply(serial, Response::error(err.to_string()));
            }
        }
    }

    fn handle(&mut self, request: ServerRequest) -> Result<(), HandlerError> {
        let ServerRequest {
            client,
            serial,
            request,
        } = request;

        match request {
            Request::ListenToEvents => {
                client.send(Event::NowListening);
                self.update_state(|s| s.add_event_listener(client.clone()));
            }

            Request::ListenToBuildChange => {
                self.update_state(|s| s.add_build_listener(client.clone()));
                let build = self.build_snapshot()?;
                client.reply(
                    serial,
                    Response::BuildStructure {
                        structure: build.structure(),
                    },
                );
            }

            Request::ClientClosed => {
                debug!(client = %client.id(), "client closed; dropping listener registrations");
                self.update_state(|s| s.disconnect(&client));
            }

            Request::KeyLookup { text } => {
                let build = self.build_snapshot()?;
                let keys = build.parse_keys(&text)?;
                client.reply(serial, Response::KeyLookup { text, keys });
            }

            Request::ListenToValue { key } => {
                let build = self.build_snapshot()?;
                match build.resolve(&key)? {
                    None => client.reply(serial, Response::KeyNotFound { key }),
                    Some(ResolvedKey::Setting { value }) => {
                        client.send(Event::ValueChange {
                            key: key.clone(),
                            value,
                        });
                        self.update_state(|s| s.add_key_listener(client.clone(), key));
                    }
                    Some(ResolvedKey::Task { command }) => {
                        // Watch the key and kick off the task that
                        // produces it. The acknowledgement carries this
                        // request's serial.
                        self.update_state(|s| s.add_key_listener(client.clone(), key));
                        self.forward_execution(ServerRequest {
                            client: client.clone(),
                            serial,
                            request: Request::Execution { command },
                        })?;
                    }
                }
            }

            Request::CommandCompletions { id, line, level } => {
                let build = self.build_snapshot()?;
                let completions = build.completions(&line, level)?;
                client.reply(serial, Response::Completions { id, completions });
            }

            Request::Execution { command } => {
                self.forward_execution(ServerRequest {
                    client,
                    serial,
                    request: Request::Execution { command },
                })?;
            }

            Request::Cancel { id } => {
                if self.last_command.cancel(id) {
                    debug!(work_id = id, "cancel signalled");
                } else {
                    debug!(work_id = id, "cancel request did not match a running command");
                }
            }
        }

        Ok(())
    }

    /// Push an execution towards the engine. The acknowledgement (with the
    /// coalesced work id) is sent by the work queue when the engine drains
    /// it.
    fn forward_execution(&self, request: ServerRequest) -> Result<(), HandlerError> {
        self.work.submit(request).map_err(|err| match err {
            SubmitError::QueueFull => HandlerError::WorkQueueFull,
            SubmitError::Closed => HandlerError::EngineClosed,
        })
    }

    fn build_snapshot(&self) -> Result<Arc<S>, HandlerError> {
        self.build_state
            .snapshot()
            .ok_or(HandlerError::BuildUnavailable)
    }

    fn update_state(&self, mutate: impl FnOnce(&ServerState) -> ServerState) {
        let next = mutate(&self.server_state.snapshot());
        self.server_state.publish(next);
    }
}
