//! Message types exchanged between clients and the dispatcher.
//!
//! These are **transport-agnostic** logical messages:
//! - [`Request`]: what a client asks the server to do.
//! - [`Response`]: a reply correlated to a specific request by its serial.
//! - [`Event`]: an uncorrelated notification pushed to subscribed listeners.
//!
//! All of them are closed tagged enums so that dispatching can match
//! exhaustively; an unhandled variant is a compile error, not a runtime
//! surprise.
//!
//! Note: the wire framing lives in the `forge-protocol` crate; this module
//! is purely logical.

use serde::{Deserialize, Serialize};

use crate::build::{BuildStructure, ScopedKey};
use crate::client::ClientHandle;

/// A request submitted by a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Subscribe to global server events.
    ListenToEvents,

    /// Subscribe to build-structure change events.
    ListenToBuildChange,

    /// Synthetic request injected by the transport when a client's
    /// connection goes away. Never sent over the wire by a well-behaved
    /// client, but accepted like any other request.
    ClientClosed,

    /// Parse free-form text into a list of scoped keys.
    KeyLookup { text: String },

    /// Subscribe to a key's value. If the key resolves to a task, the
    /// task's command is also queued for execution.
    ListenToValue { key: ScopedKey },

    /// Tab-completion query for a partially typed command line.
    CommandCompletions { id: u64, line: String, level: u8 },

    /// Run a command on the build engine.
    Execution { command: String },

    /// Best-effort cancellation of a running execution. `id` names the
    /// work item to cancel; `0` targets whatever is currently running.
    Cancel { id: u64 },
}

/// A reply to a specific client request.
///
/// Replies are always delivered to the requesting client only, tagged with
/// the client-assigned serial of the request they answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// The execution request was accepted and queued as work item `id`.
    /// Duplicate commands are coalesced, so several clients may be told
    /// the same id.
    ExecutionRequestReceived { id: u64 },

    /// Result of a [`Request::KeyLookup`]. `keys` may be empty; unparsable
    /// text is not an error.
    KeyLookup { text: String, keys: Vec<ScopedKey> },

    /// Result of a [`Request::CommandCompletions`] query.
    Completions { id: u64, completions: Vec<String> },

    /// Current build structure, sent when a client subscribes to build
    /// changes.
    BuildStructure { structure: BuildStructure },

    /// A [`Request::ListenToValue`] named a key the build does not define.
    KeyNotFound { key: ScopedKey },

    /// A bounded server-side queue was full; the request was dropped and
    /// may be retried by the client.
    QueueFull,

    /// The request handler failed. The dispatcher itself keeps running.
    Error { message: String },
}

/// A notification pushed to subscribed listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Handshake event: the server is up and the build is loaded.
    NowListening,

    /// The initial project load completed.
    BuildLoaded,

    /// The build structure changed after a command.
    BuildStructureChanged { structure: BuildStructure },

    /// Work item `id` ran to completion.
    ExecutionSuccess { id: u64 },

    /// Work item `id` failed or was cancelled.
    ExecutionFailure { id: u64 },

    /// A watched key has a new value. Also sent once when a client first
    /// subscribes to a setting-valued key.
    ValueChange { key: ScopedKey, value: String },

    /// Server-side log line mirrored to event listeners.
    Log { level: LogLevel, message: String },
}

/// Severity of an [`Event::Log`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Server → client envelope: either a correlated reply or a pushed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Reply { serial: u64, response: Response },
    Event { event: Event },
}

/// A request paired with its origin, as it flows through the dispatcher.
///
/// `serial` is client-assigned and opaque here; it only matters as the
/// correlation token echoed back in replies.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub client: ClientHandle,
    pub serial: u64,
    pub request: Request,
}

// -----------------------------------------------------------------------------
// Convenience constructors
// -----------------------------------------------------------------------------

impl Response {
    /// Convenience constructor for an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

impl Event {
    /// Convenience constructor for a log event.
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Event::Log {
            level,
            message: message.into(),
        }
    }
}
