//! Client-facing JSON shape of a task.
//!
//! The same body is returned by the polling endpoint and POSTed to webhooks.

use serde::{Deserialize, Serialize};

use crate::id::TaskId;
use crate::task::{Task, TaskResult, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub user_id: String,
    pub retry_count: u32,
    /// `null` until the task completes.
    pub result: Option<TaskResult>,
    /// Present only for `error` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        let error = match task.status {
            TaskStatus::Error => task.error_message.clone(),
            _ => None,
        };
        let result = match task.status {
            TaskStatus::Completed => task.result.clone(),
            _ => None,
        };

        Self {
            task_id: task.task_id,
            status: task.status,
            user_id: task.user_id.clone(),
            retry_count: task.retry_count,
            result,
            error,
        }
    }
}
