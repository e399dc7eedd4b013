use chrono::NaiveDate;
use serde::Serialize;

use crate::controller::TaskController;
use crate::errors::TaskError;
use crate::models::{DayStats, Task, TaskId};
use crate::notifier::NotificationAction;
use crate::runner::RunnerHandle;

#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl<T: Serialize> CommandResult<T> {
    /// Erases the payload type for the wire.
    pub fn into_value(self) -> CommandResult<serde_json::Value> {
        let data = match self.data.map(serde_json::to_value).transpose() {
            Ok(data) => data,
            Err(error) => {
                log::error!("commands: response not serializable: {error}");
                return err(&TaskError::InvalidInput(format!(
                    "response not serializable: {error}"
                )));
            }
        };
        CommandResult {
            ok: self.ok,
            data,
            error: self.error,
            error_kind: self.error_kind,
        }
    }
}

pub fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
        error_kind: None,
    }
}

/// Success without a payload: the target vanished.
pub fn gone<T>() -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: None,
        error: None,
        error_kind: None,
    }
}

pub fn err<T>(error: &TaskError) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(error.to_string()),
        error_kind: Some(error.kind()),
    }
}

fn fold<T>(command: &str, result: Result<T, TaskError>) -> CommandResult<T> {
    match result {
        Ok(data) => ok(data),
        Err(TaskError::NotFound(id)) => {
            log::debug!("commands: {command} task_id={id} not found, ignored");
            gone()
        }
        Err(error) => {
            log::warn!("commands: {command} failed kind={} {error}", error.kind());
            err(&error)
        }
    }
}

fn fold_optional<T>(command: &str, result: Result<Option<T>, TaskError>) -> CommandResult<T> {
    match result {
        Ok(Some(data)) => ok(data),
        Ok(None) => gone(),
        Err(error) => fold(command, Err(error)),
    }
}

pub async fn list_tasks(ctl: &mut TaskController, date: NaiveDate) -> CommandResult<Vec<Task>> {
    fold(
        "list_tasks",
        ctl.select_date(date).await.map(|tasks| tasks.to_vec()),
    )
}

pub async fn add_task(
    ctl: &mut TaskController,
    title: &str,
    date: Option<NaiveDate>,
) -> CommandResult<Task> {
    let date = date.unwrap_or_else(|| ctl.current_date());
    fold("add_task", ctl.add_task(title, date).await)
}

pub async fn toggle_task(ctl: &mut TaskController, task_id: TaskId) -> CommandResult<Task> {
    fold_optional("toggle_task", ctl.toggle_task(task_id).await)
}

pub async fn delete_task(ctl: &mut TaskController, task_id: TaskId) -> CommandResult<bool> {
    fold("delete_task", ctl.delete_task(task_id).await.map(|()| true))
}

pub async fn set_reminder(
    ctl: &mut TaskController,
    task_id: TaskId,
    time: &str,
) -> CommandResult<Task> {
    fold_optional("set_reminder", ctl.save_reminder(task_id, time).await)
}

pub async fn clear_reminder(ctl: &mut TaskController, task_id: TaskId) -> CommandResult<Task> {
    fold_optional("clear_reminder", ctl.remove_reminder(task_id).await)
}

pub async fn day_stats(ctl: &TaskController, date: Option<NaiveDate>) -> CommandResult<DayStats> {
    let date = date.unwrap_or_else(|| ctl.current_date());
    fold("day_stats", ctl.stats_on(date).await)
}

pub async fn resync(ctl: &TaskController) -> CommandResult<usize> {
    fold("resync", ctl.resync().await)
}

/// Feeds a notification click into the runner, which answers with a
/// foreground event.
pub fn notification_action(
    runner: &RunnerHandle,
    task_id: TaskId,
    date: NaiveDate,
    action: NotificationAction,
) -> CommandResult<bool> {
    if runner.interaction(task_id, date, action) {
        ok(true)
    } else {
        err(&TaskError::InvalidInput(
            "background runner is not running".to_string(),
        ))
    }
}
