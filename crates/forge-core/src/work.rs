//! Work queue between the reader loop and the engine loop, with
//! duplicate-command coalescing.
//!
//! The reader pushes raw execution requests into a bounded channel. The
//! engine drives [`WorkSource::take_next_work`], which drains that channel
//! into an ordered pending list, merging duplicates as it goes, and hands
//! back one unit of [`Work`] at a time.
//!
//! Invariants:
//! - The pending list never holds two entries with the same command
//!   string; a duplicate merges its requester into the existing entry and
//!   is told the existing entry's id.
//! - Ids are assigned from a counter starting at 1 (0 is reserved as the
//!   null id) and never reused.
//! - A distinct command is appended at the tail; coalescing never moves an
//!   entry, so first-request order is execution order.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::debug;

use crate::client::ClientHandle;
use crate::error::SubmitError;
use crate::messages::{Request, Response, ServerRequest};
use crate::state::{ServerState, ServerStateCell};

/// A unit of work for the engine loop.
#[derive(Debug, Clone)]
pub enum Work {
    CommandExecution(CommandExecution),

    /// Terminal marker: the reader is gone and no more work can arrive.
    EndOfWork,
}

/// One coalesced command execution.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    /// Monotonic id, echoed to every requester.
    pub id: u64,

    /// The command line the engine will run.
    pub command: String,

    /// Every client whose request was folded into this entry.
    pub requesters: HashSet<ClientHandle>,
}

#[derive(Debug)]
struct PendingWork {
    queue: VecDeque<CommandExecution>,
    next_id: u64,
}

/// Create the work queue with the given raw-channel capacity.
///
/// `server_state` is snapshotted on every take so the engine sees the
/// listener bookkeeping current at hand-off time.
pub fn work_queue(
    capacity: usize,
    server_state: Arc<ServerStateCell>,
) -> (WorkQueue, WorkSource) {
    let (tx, rx) = mpsc::channel(capacity);
    let pending = Arc::new(Mutex::new(PendingWork {
        queue: VecDeque::new(),
        next_id: 1,
    }));
    (
        WorkQueue {
            tx,
            pending: pending.clone(),
        },
        WorkSource {
            rx,
            pending,
            server_state,
        },
    )
}

/// Producer half, owned by the reader loop.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<ServerRequest>,
    pending: Arc<Mutex<PendingWork>>,
}

impl WorkQueue {
    /// Enqueue an execution request without waiting.
    ///
    /// Only [`Request::Execution`] may travel this channel; anything else
    /// is rejected as a programming error when the engine drains it.
    pub fn submit(&self, request: ServerRequest) -> Result<(), SubmitError> {
        self.tx.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Snapshot of the coalesced pending list, oldest first.
    ///
    /// Observation hook for tests and for a future queue-state broadcast;
    /// nothing in the dispatch path depends on it.
    pub fn pending_commands(&self) -> Vec<CommandExecution> {
        let pending = self.pending.lock().expect("work queue lock poisoned");
        pending.queue.iter().cloned().collect()
    }
}

/// Consumer half, driven by the engine loop.
#[derive(Debug)]
pub struct WorkSource {
    rx: mpsc::Receiver<ServerRequest>,
    pending: Arc<Mutex<PendingWork>>,
    server_state: Arc<ServerStateCell>,
}

impl WorkSource {
    /// Hand the engine its next unit of work, blocking until one exists.
    ///
    /// Drains everything currently in the raw channel into the pending
    /// list (coalescing duplicates and acknowledging every requester),
    /// then pops the head. Only when the pending list is empty does it
    /// block on the raw channel, and it does so with the bookkeeping lock
    /// released.
    ///
    /// Blocking primitive: call from a dedicated thread, never from async
    /// context.
    pub fn take_next_work(&mut self) -> (Arc<ServerState>, Work) {
        loop {
            let mut closed = false;
            {
                let mut pending = self.pending.lock().expect("work queue lock poisoned");
                loop {
                    match self.rx.try_recv() {
                        Ok(request) => coalesce(&mut pending, request),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            closed = true;
                            break;
                        }
                    }
                }
                if let Some(execution) = pending.queue.pop_front() {
                    debug!(work_id = execution.id, command = %execution.command, "work taken");
                    return (
                        self.server_state.snapshot(),
                        Work::CommandExecution(execution),
                    );
                }
            }

            if closed {
                return (self.server_state.snapshot(), Work::EndOfWork);
            }

            // Nothing pending and the channel is drained: wait for the
            // next raw request with the lock released, then go around
            // again to coalesce whatever has piled up.
            match self.rx.blocking_recv() {
                Some(request) => {
                    let mut pending = self.pending.lock().expect("work queue lock poisoned");
                    coalesce(&mut pending, request);
                }
                None => return (self.server_state.snapshot(), Work::EndOfWork),
            }
        }
    }
}

/// Fold one raw request into the pending list and acknowledge it.
fn coalesce(pending: &mut PendingWork, request: ServerRequest) {
    let ServerRequest {
        client,
        serial,
        request,
    } = request;

    let Request::Execution { command } = request else {
        panic!("non-execution request reached the work queue: {request:?}");
    };

    if let Some(existing) = pending.queue.iter_mut().find(|w| w.command == command) {
        existing.requesters.insert(client.clone());
        client.reply(
            serial,
            Response::ExecutionRequestReceived { id: existing.id },
        );
        return;
    }

    let id = pending.next_id;
    pending.next_id += 1;
    pending.queue.push_back(CommandExecution {
        id,
        command,
        requesters: HashSet::from([client.clone()]),
    });
    client.reply(serial, Response::ExecutionRequestReceived { id });
}
