//! The narrow seam between the dispatcher and the build engine.
//!
//! The dispatcher never looks inside the build. It needs exactly four
//! read-only questions answered against a state snapshot ([`BuildState`])
//! and two mutating operations on the engine itself ([`BuildEngine`]).
//! Everything else about compilation, resolution, and task execution is the
//! engine's business.
//!
//! Domain values cross this boundary already rendered to strings; the
//! dispatcher does not care about their real types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;

/// A key in the build, optionally qualified by a scope (e.g. a project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedKey {
    pub scope: Option<String>,
    pub name: String,
}

impl ScopedKey {
    /// A key without a scope qualifier.
    pub fn global(name: impl Into<String>) -> Self {
        ScopedKey {
            scope: None,
            name: name.into(),
        }
    }

    /// A key qualified by a scope.
    pub fn scoped(scope: impl Into<String>, name: impl Into<String>) -> Self {
        ScopedKey {
            scope: Some(scope.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}", scope, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Shape of the build as shown to build-change listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStructure {
    pub projects: Vec<String>,
}

/// What a [`ScopedKey`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedKey {
    /// A plain value, rendered for transport.
    Setting { value: String },

    /// A task; running it means executing `command`.
    Task { command: String },
}

/// Internal failure of a [`BuildState`] query.
///
/// Not to be confused with "no result": unparsable key text and unknown
/// keys are ordinary answers, not errors. A `StateError` means the backing
/// machinery itself broke, and is reported to the requesting client.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StateError(pub String);

/// Failure of an engine command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Read-only snapshot of the build, produced by the engine after each
/// command. Snapshots are immutable and shared freely across threads.
pub trait BuildState: Send + Sync + 'static {
    /// Parse free-form text into the scoped keys it denotes. Text that
    /// parses to nothing yields `Ok` with an empty list.
    fn parse_keys(&self, text: &str) -> Result<Vec<ScopedKey>, StateError>;

    /// Resolve a key to its setting value or task command. `Ok(None)`
    /// means the build does not define the key.
    fn resolve(&self, key: &ScopedKey) -> Result<Option<ResolvedKey>, StateError>;

    /// Current shape of the build.
    fn structure(&self) -> BuildStructure;

    /// Tab completions for a partially typed command line.
    fn completions(&self, line: &str, level: u8) -> Result<Vec<String>, StateError>;
}

/// The build engine driven by the engine loop.
///
/// Implementations are single-threaded by contract: the dispatcher calls
/// these methods from exactly one thread, strictly sequentially.
pub trait BuildEngine: Send + 'static {
    type State: BuildState;

    /// Initial project load. Called once, before any command runs.
    fn load(&mut self) -> Result<Arc<Self::State>, CommandError>;

    /// Execute one command to completion and return the post-command
    /// snapshot. Long-running commands should poll `cancel` and bail out
    /// with [`CommandError::Cancelled`]; ignoring it is allowed and simply
    /// makes cancellation a no-op.
    fn run_command(&mut self, command: &str, cancel: &CancelToken)
        -> Result<Arc<Self::State>, CommandError>;

    /// Latest snapshot, including after a failed command.
    fn current_state(&self) -> Arc<Self::State>;
}
