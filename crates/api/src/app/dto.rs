use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use phonescan_core::{TaskId, TaskStatus};

use crate::app::services::{Admission, Submission};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /process`. Fields are optional here so that a missing
/// field is reported as a validation error rather than a decode failure.
#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub image_url: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
    pub callback_url: Option<String>,
}

impl From<ProcessRequest> for Submission {
    fn from(req: ProcessRequest) -> Self {
        Submission {
            image_url: req.image_url,
            user_id: req.user_id,
            timestamp: req.timestamp,
            callback_url: req.callback_url,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ProcessAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: &'static str,
    pub enqueued_at: DateTime<Utc>,
    pub queue_size: usize,
}

impl From<Admission> for ProcessAccepted {
    fn from(a: Admission) -> Self {
        Self {
            task_id: a.task_id,
            status: a.status,
            message: "Job successfully queued for processing",
            enqueued_at: a.enqueued_at,
            queue_size: a.queue_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotFound<'a> {
    pub task_id: &'a str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub queue_connected: bool,
    pub queue_size: usize,
    pub timestamp: DateTime<Utc>,
}
