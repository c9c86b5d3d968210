//! Error types shared across the dispatcher.

use thiserror::Error;

/// Failure to enqueue into one of the dispatcher's bounded queues.
///
/// Overflow is surfaced to the submitting client; the dispatcher never
/// retries or drops silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("queue is full")]
    QueueFull,

    #[error("dispatcher is shutting down")]
    Closed,
}
