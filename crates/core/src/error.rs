//! Domain error model.

use thiserror::Error;

use crate::id::TaskId;
use crate::task::TaskStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic task-level failures. Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The transition is not allowed from the task's current status.
    #[error("cannot {action} task {task_id}: status is {from}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("invalid task id: {0}")]
    InvalidId(String),

    /// The stored record moved on since it was read.
    #[error("version conflict: expected {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },
}
