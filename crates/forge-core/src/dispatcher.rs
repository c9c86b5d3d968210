//! One-call wiring of the dispatcher pieces.

use std::sync::Arc;

use crate::build::BuildEngine;
use crate::cancel::LastCommandCell;
use crate::config::DispatcherConfig;
use crate::engine_loop::EngineLoop;
use crate::reader::Reader;
use crate::request_queue::{request_queue, RequestQueue};
use crate::state::{BuildStateCell, ServerStateCell};
use crate::work::{work_queue, WorkQueue};

/// The assembled dispatcher, ready to be driven.
///
/// `reader.run()` wants a task; `engine.run()` wants a dedicated thread.
/// `requests` is the producer handle the transport clones per connection.
/// `work` and `server_state` are observation handles; nothing requires
/// touching them.
pub struct Dispatcher<E: BuildEngine> {
    pub requests: RequestQueue,
    pub reader: Reader<E::State>,
    pub engine: EngineLoop<E>,
    pub work: WorkQueue,
    pub server_state: Arc<ServerStateCell>,
}

/// Wire up queues, state cells, reader, and engine loop around `engine`.
pub fn dispatcher<E: BuildEngine>(engine: E, config: DispatcherConfig) -> Dispatcher<E> {
    let server_state = Arc::new(ServerStateCell::new());
    let build_state = Arc::new(BuildStateCell::new());
    let last_command = LastCommandCell::new();

    let (requests, request_rx) = request_queue(config.request_queue_capacity);
    let (work, source) = work_queue(config.work_raw_capacity, server_state.clone());

    let reader = Reader::new(
        request_rx,
        server_state.clone(),
        build_state.clone(),
        work.clone(),
        last_command.clone(),
        config,
    );
    let engine = EngineLoop::new(engine, source, build_state, server_state.clone(), last_command);

    Dispatcher {
        requests,
        reader,
        engine,
        work,
        server_state,
    }
}
