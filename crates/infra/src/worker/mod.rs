//! Background processing of queued tasks.
//!
//! ## Design
//!
//! - A [`Worker`] is a single sequential consumer: it owns one recognizer
//!   instance and never processes two tasks at once.
//! - Only the worker holding the queue's consumer claim dequeues; any other
//!   worker on the same queue stands by.
//! - Failures are retried by handing the id back to the queue with a backoff
//!   delay, never by sleeping in-process.
//! - An infrastructure error leaves the lease in place; the task comes back
//!   once the lease expires.
//!
//! ## Components
//!
//! - `RetryPolicy`: retry bound and backoff schedule
//! - `pipeline`: download → recognize → extract for one task
//! - `Worker` / `WorkerHandle`: the loop, its statistics and shutdown

pub mod executor;
pub mod pipeline;
pub mod retry;

pub use executor::{
    Outcome, Worker, WorkerConfig, WorkerDeps, WorkerError, WorkerHandle, WorkerStats,
};
pub use pipeline::{FailureKind, ProcessingError};
pub use retry::RetryPolicy;
