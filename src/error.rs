//! Scheduler error types.

use thiserror::Error;

/// Errors surfaced by the fair queue and the IO queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Admission or a shares update named a class that was never registered.
    /// Recoverable: register the class first.
    #[error("priority class {class:?} not registered")]
    ClassNotFound { class: String },

    /// The queue was shut down. Admission is rejected with this error and
    /// pending requests are cancelled with it; it is terminal.
    #[error("IO queue closed")]
    Closed,
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
