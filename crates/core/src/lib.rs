//! `phonescan-core` — task domain building blocks.
//!
//! This crate contains the **pure** task model (no infrastructure concerns):
//! identifiers, the status state machine, result payloads and the JSON view
//! shared by the polling endpoint and webhook delivery.

pub mod error;
pub mod id;
pub mod task;
pub mod version;
pub mod view;

pub use error::{DomainError, DomainResult};
pub use id::TaskId;
pub use task::{NewTask, Task, TaskResult, TaskStatus};
pub use version::ExpectedVersion;
pub use view::TaskView;
