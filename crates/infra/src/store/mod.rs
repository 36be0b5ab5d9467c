//! Expiring key-value store of task records.
//!
//! The store is the single source of truth for status and result. Records
//! expire `ttl` after their last write; every successful `update` refreshes
//! the expiry.

use async_trait::async_trait;
use thiserror::Error;

use phonescan_core::{DomainError, DomainResult, Task, TaskId};

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_kv;

pub use memory::InMemoryTaskStore;
#[cfg(feature = "redis")]
pub use redis_kv::RedisTaskStore;

/// A read-modify-write step applied to a stored task.
///
/// Must be repeatable: a backend may re-run it against a fresher copy after
/// losing a concurrent write.
pub type TaskMutation<'a> = &'a (dyn Fn(&mut Task) -> DomainResult<()> + Send + Sync);

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Unknown id, or the record expired.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    Duplicate(TaskId),

    /// The mutation refused the transition; the record is unchanged.
    #[error("transition rejected: {0}")]
    Rejected(#[from] DomainError),

    /// Concurrent writers kept winning; the record is unchanged.
    #[error("write conflict on task {0}")]
    Conflict(TaskId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt task record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new record. Fails with `Duplicate` if the id is live.
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// Atomically apply `mutation` and return the updated record.
    async fn update(&self, task_id: TaskId, mutation: TaskMutation<'_>) -> Result<Task, StoreError>;

    /// Current record, or `None` if unknown or expired.
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
