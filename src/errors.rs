use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use crate::models::TaskId;
use crate::storage::StorageError;

/// Failures surfaced by the scheduler and controller.
#[derive(Debug)]
pub enum TaskError {
    Storage(StorageError),
    PermissionDenied,
    PastTime { scheduled_for: DateTime<FixedOffset> },
    NotFound(TaskId),
    Timeout { waited: Duration },
    InvalidInput(String),
    /// The command queue is full; the command was not run.
    Busy,
}

impl TaskError {
    /// Stable code used on the host wire.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Storage(_) => "storage",
            TaskError::PermissionDenied => "permission_denied",
            TaskError::PastTime { .. } => "past_time",
            TaskError::NotFound(_) => "not_found",
            TaskError::Timeout { .. } => "timeout",
            TaskError::InvalidInput(_) => "invalid_input",
            TaskError::Busy => "busy",
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Storage(err) => write!(f, "storage error: {err}"),
            TaskError::PermissionDenied => {
                write!(f, "notification permission was not granted")
            }
            TaskError::PastTime { scheduled_for } => {
                write!(f, "cannot set a reminder in the past ({scheduled_for})")
            }
            TaskError::NotFound(id) => write!(f, "task {id} not found"),
            TaskError::Timeout { waited } => {
                write!(f, "no answer after {}s", waited.as_secs())
            }
            TaskError::InvalidInput(message) => write!(f, "invalid input: {message}"),
            TaskError::Busy => write!(f, "too many commands in flight, retry later"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for TaskError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(id) => TaskError::NotFound(id),
            other => TaskError::Storage(other),
        }
    }
}
