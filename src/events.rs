use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::models::{Task, TaskId};
use crate::notifier::{NotificationAction, SystemNotification};

/// Foreground → background runner messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerMessage {
    ScheduleNotification {
        task: Task,
    },
    CancelNotification {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    UpdateNotifications,
}

/// Background runner → foreground broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForegroundEvent {
    CompleteTask {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },
    OpenView {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        date: NaiveDate,
    },
}

/// Everything the runner loop accepts: protocol messages plus the platform's
/// notification callbacks and diagnostics queries.
#[derive(Debug)]
pub enum RunnerCommand {
    Message(RunnerMessage),
    Interaction {
        task_id: TaskId,
        date: NaiveDate,
        action: NotificationAction,
    },
    LiveTimers {
        reply: oneshot::Sender<Vec<TaskId>>,
    },
    /// Ends the loop even while other handles are alive.
    Stop,
}

impl From<RunnerMessage> for RunnerCommand {
    fn from(value: RunnerMessage) -> Self {
        RunnerCommand::Message(value)
    }
}

/// Events the host bridge writes to stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PermissionRequested,
    Notification { notification: SystemNotification },
    TaskCompleted { task: Task },
    OpenView { date: NaiveDate },
}
