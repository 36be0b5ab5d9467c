//! Task record and its status state machine.
//!
//! ```text
//! queued -> processing -> completed
//!              |   \----> error
//!              v
//!           queued (retryable failure, retry_count + 1)
//! ```
//!
//! `completed` and `error` are terminal: every transition method refuses to
//! leave them, which is what keeps status monotonic regardless of which store
//! backs the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::TaskId;

/// Lifecycle status of a task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted (or re-admitted after a retryable failure), waiting for the worker.
    Queued,
    /// Claimed by the worker.
    Processing,
    /// Finished with a result payload.
    Completed,
    /// Gave up after exhausting retries.
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Extracted number, `None` when the image held no candidate.
    pub phone_number: Option<String>,
    /// Human-readable rendering of `phone_number`.
    pub formatted_number: Option<String>,
    pub confidence: f64,
    /// Recognized text (truncated).
    pub ocr_text: String,
    /// Wall-clock seconds spent on download + recognition + extraction.
    pub processing_time: f64,
    pub processed_at: DateTime<Utc>,
}

/// Validated submission used to admit a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub image_url: String,
    pub user_id: String,
    pub submitted_at: String,
    pub callback_url: Option<String>,
}

/// A submitted image-processing job and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub image_url: String,
    pub user_id: String,
    /// Client-supplied submission timestamp, stored verbatim.
    pub submitted_at: String,
    pub callback_url: Option<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub result: Option<TaskResult>,
    pub error_message: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every transition; used for conditional writes.
    pub version: u64,
}

impl Task {
    /// Admit a new task with a fresh id in `queued` status.
    pub fn admit(new: NewTask) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::new(),
            image_url: new.image_url,
            user_id: new.user_id,
            submitted_at: new.submitted_at,
            callback_url: new.callback_url,
            status: TaskStatus::Queued,
            retry_count: 0,
            result: None,
            error_message: None,
            enqueued_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Claim the task for processing.
    ///
    /// Accepted from `processing` as well: a task whose lease expired is
    /// redelivered while its record still says `processing`.
    pub fn start_processing(&mut self) -> DomainResult<()> {
        self.ensure_not_terminal("start processing")?;
        self.status = TaskStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Return the task to the queue after a retryable failure.
    ///
    /// Returns the new `retry_count`.
    pub fn schedule_retry(&mut self) -> DomainResult<u32> {
        self.ensure_processing("schedule retry")?;
        self.retry_count += 1;
        self.status = TaskStatus::Queued;
        self.touch();
        Ok(self.retry_count)
    }

    /// Record a successful result.
    pub fn complete(&mut self, result: TaskResult) -> DomainResult<()> {
        self.ensure_processing("complete")?;
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error_message = None;
        self.touch();
        Ok(())
    }

    /// Record a terminal failure.
    pub fn fail(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.ensure_processing("fail")?;
        self.status = TaskStatus::Error;
        self.error_message = Some(message.into());
        self.result = None;
        self.touch();
        Ok(())
    }

    fn ensure_not_terminal(&self, action: &'static str) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(self.illegal(action));
        }
        Ok(())
    }

    fn ensure_processing(&self, action: &'static str) -> DomainResult<()> {
        if self.status != TaskStatus::Processing {
            return Err(self.illegal(action));
        }
        Ok(())
    }

    fn illegal(&self, action: &'static str) -> DomainError {
        DomainError::IllegalTransition {
            task_id: self.task_id,
            from: self.status,
            action,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
