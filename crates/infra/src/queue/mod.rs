//! Durable FIFO of pending task ids.
//!
//! ## Delivery model
//!
//! - `enqueue` appends at the tail; `dequeue` pops the head.
//! - A dequeued id is *leased*: it sits in an in-flight set until it is
//!   `ack`ed (terminal outcome) or handed back with `retry` (delayed re-enqueue).
//! - A lease that is neither acked nor retried before its deadline (the worker
//!   crashed mid-task) is returned to the tail by `reclaim_expired`.
//! - Delayed ids join the tail once their delay elapses, in due order.
//!
//! ## Single consumer
//!
//! Only one worker may consume a queue at a time. A worker holds the
//! *consumer claim* (`claim_consumer`) and renews it every iteration; any
//! other worker sees `false` and stays on standby until the claim is
//! released or lapses.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use phonescan_core::TaskId;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_list;

pub use memory::InMemoryJobQueue;
#[cfg(feature = "redis")]
pub use redis_list::RedisJobQueue;

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The backing store could not be reached.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The backing store returned something that is not a task id.
    #[error("corrupt queue entry: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Append `task_id` at the tail. Returns the queue depth afterwards.
    async fn enqueue(&self, task_id: TaskId) -> Result<usize, QueueError>;

    /// Pop the head, waiting up to `timeout` for one to become available.
    ///
    /// The returned id is leased to the caller; each id is handed to exactly
    /// one caller per enqueue.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError>;

    /// Release the lease of a task that reached a terminal outcome.
    async fn ack(&self, task_id: TaskId) -> Result<(), QueueError>;

    /// Release the lease and re-enqueue at the tail once `delay` has elapsed.
    async fn retry(&self, task_id: TaskId, delay: Duration) -> Result<(), QueueError>;

    /// Take or renew the consumer claim for `owner` for `ttl`. Returns
    /// `false` while a different owner holds an unexpired claim.
    async fn claim_consumer(&self, owner: &str, ttl: Duration) -> Result<bool, QueueError>;

    /// Drop the consumer claim if `owner` still holds it.
    async fn release_consumer(&self, owner: &str) -> Result<(), QueueError>;

    /// Return every expired lease to the tail. Returns the reclaimed ids.
    async fn reclaim_expired(&self) -> Result<Vec<TaskId>, QueueError>;

    /// Ids admitted but not yet claimed (ready plus delayed).
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), QueueError>;
}
