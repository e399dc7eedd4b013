use std::sync::Arc;
use std::time::Duration;

use crate::errors::TaskError;
use crate::models::{PermissionState, Reminder, Task, TaskId};
use crate::permission::PermissionProvider;
use crate::reminder::{fire_time, format_time_of_day, parse_time_of_day, Clock};
use crate::runner::RunnerHandle;
use crate::storage::TaskStore;

/// Turns a wall-clock choice into a persisted reminder and keeps the runner's
/// timers in line with the store.
pub struct NotificationScheduler {
    store: Arc<TaskStore>,
    runner: RunnerHandle,
    permission: Arc<dyn PermissionProvider>,
    clock: Arc<dyn Clock>,
    prompt_timeout: Duration,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<TaskStore>,
        runner: RunnerHandle,
        permission: Arc<dyn PermissionProvider>,
        clock: Arc<dyn Clock>,
        prompt_timeout: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            permission,
            clock,
            prompt_timeout,
        }
    }

    pub fn runner(&self) -> &RunnerHandle {
        &self.runner
    }

    pub fn permission(&self) -> PermissionState {
        self.permission.status()
    }

    /// Sets a reminder for `task` at `time_of_day` ("HH:MM") on the task's date.
    ///
    /// On error the stored task is left as it was.
    pub async fn schedule(&self, task: &Task, time_of_day: &str) -> Result<Task, TaskError> {
        self.ensure_permission().await?;

        let time = parse_time_of_day(time_of_day)?;
        let scheduled_for = fire_time(task.date, time)?;
        if scheduled_for <= self.clock.now() {
            return Err(TaskError::PastTime { scheduled_for });
        }

        let mut next = task.clone();
        next.notification = Some(Reminder {
            time: format_time_of_day(time),
            scheduled_for,
        });
        let saved = self.store.update(next).await?;
        if !self.runner.schedule(saved.clone()) {
            log::warn!("scheduler: runner unavailable, task_id={} waits for resync", saved.id);
        }
        log::info!(
            "scheduler: reminder set task_id={} at={scheduled_for}",
            saved.id
        );
        Ok(saved)
    }

    /// Clears the reminder. A task without one is returned unchanged.
    pub async fn cancel(&self, task: &Task) -> Result<Task, TaskError> {
        if task.notification.is_none() {
            self.runner.cancel(task.id);
            return Ok(task.clone());
        }
        let mut next = task.clone();
        next.notification = None;
        let saved = self.store.update(next).await?;
        self.runner.cancel(saved.id);
        log::info!("scheduler: reminder cleared task_id={}", saved.id);
        Ok(saved)
    }

    /// Drops the live timer without touching the store (the record is going away).
    pub fn forget(&self, task_id: TaskId) {
        self.runner.cancel(task_id);
    }

    /// Clears reminders whose fire time passed while nothing was running.
    pub async fn prune_expired(&self) -> Result<usize, TaskError> {
        let now = self.clock.now();
        let mut pruned = 0;
        for task in self.store.list_with_live_notifications().await? {
            let expired = task
                .notification
                .as_ref()
                .is_some_and(|reminder| reminder.scheduled_for <= now);
            if !expired {
                continue;
            }
            match self.cancel(&task).await {
                Ok(_) => pruned += 1,
                Err(TaskError::NotFound(id)) => {
                    log::debug!("scheduler: prune skipped vanished task_id={id}")
                }
                Err(err) => return Err(err),
            }
        }
        if pruned > 0 {
            log::info!("scheduler: pruned {pruned} expired reminders");
        }
        Ok(pruned)
    }

    /// Rebuilds the runner's timer set from the store.
    pub async fn resync_all(&self) -> Result<usize, TaskError> {
        let tasks = self.store.list_with_live_notifications().await?;
        self.runner.update_all();
        let count = tasks.len();
        for task in tasks {
            self.runner.schedule(task);
        }
        log::info!("scheduler: resynced {count} reminders");
        Ok(count)
    }

    async fn ensure_permission(&self) -> Result<(), TaskError> {
        if !self.permission.supported() {
            return Err(TaskError::PermissionDenied);
        }
        if self.permission.status() == PermissionState::Granted {
            return Ok(());
        }
        let answer = tokio::time::timeout(self.prompt_timeout, self.permission.request())
            .await
            .map_err(|_| TaskError::Timeout {
                waited: self.prompt_timeout,
            })?;
        match answer {
            PermissionState::Granted => Ok(()),
            PermissionState::Denied | PermissionState::Default => Err(TaskError::PermissionDenied),
        }
    }
}
