//! forge-core
//!
//! Dispatcher core for the forge remote-control server:
//! - message model (requests, replies, events)
//! - per-client handles and listener bookkeeping
//! - bounded request queue feeding the reader loop
//! - work queue with duplicate-command coalescing
//! - the reader loop and the engine-side command loop
//!
//! The build engine itself is a collaborator behind the [`BuildEngine`] /
//! [`BuildState`] traits; this crate never looks inside a build.

pub mod build;
pub mod cancel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod engine_loop;
pub mod error;
pub mod messages;
pub mod reader;
pub mod request_queue;
pub mod state;
pub mod work;

pub use build::{
    BuildEngine, BuildState, BuildStructure, CommandError, ResolvedKey, ScopedKey, StateError,
};
pub use cancel::{CancelToken, LastCommand, LastCommandCell};
pub use client::{ClientHandle, ClientId, OutboundRx, OutboundTx};
pub use config::DispatcherConfig;
pub use dispatcher::{dispatcher, Dispatcher};
pub use engine_loop::EngineLoop;
pub use error::SubmitError;
pub use messages::{Event, LogLevel, Request, Response, ServerMessage, ServerRequest};
pub use reader::Reader;
pub use request_queue::{request_queue, RequestQueue, RequestReceiver};
pub use state::{BuildStateCell, ServerState, ServerStateCell};
pub use work::{work_queue, CommandExecution, Work, WorkQueue, WorkSource};
