use std::sync::Arc;

use chrono::NaiveDate;

use crate::errors::TaskError;
use crate::events::ForegroundEvent;
use crate::models::{DayStats, NewTask, Task, TaskId};
use crate::scheduler::NotificationScheduler;
use crate::storage::TaskStore;

#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Completed(Task),
    Navigated(NaiveDate),
    Ignored,
}

/// Foreground side: the selected day, its cached tasks, and the user actions
/// that touch the store and the scheduler.
///
/// Only this controller writes task records.
pub struct TaskController {
    store: Arc<TaskStore>,
    scheduler: Arc<NotificationScheduler>,
    current_date: NaiveDate,
    tasks: Vec<Task>,
}

impl TaskController {
    pub fn new(
        store: Arc<TaskStore>,
        scheduler: Arc<NotificationScheduler>,
        today: NaiveDate,
    ) -> Self {
        Self {
            store,
            scheduler,
            current_date: today,
            tasks: Vec::new(),
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    /// Cached tasks of the selected day, newest first.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn stats(&self) -> DayStats {
        DayStats::from_tasks(&self.tasks)
    }

    /// Stats for any day; the selected day is served from the cache.
    pub async fn stats_on(&self, date: NaiveDate) -> Result<DayStats, TaskError> {
        if date == self.current_date {
            return Ok(self.stats());
        }
        let tasks = self.store.list_by_date(date).await?;
        Ok(DayStats::from_tasks(&tasks))
    }

    pub async fn resync(&self) -> Result<usize, TaskError> {
        self.scheduler.resync_all().await
    }

    /// Repairs reminders missed while closed, rebuilds the runner's timers,
    /// then loads the selected day.
    pub async fn startup(&mut self, prune_expired: bool) -> Result<(), TaskError> {
        self.store.init().await?;
        if prune_expired {
            self.scheduler.prune_expired().await?;
        }
        self.scheduler.resync_all().await?;
        self.reload().await
    }

    pub async fn select_date(&mut self, date: NaiveDate) -> Result<&[Task], TaskError> {
        self.current_date = date;
        self.reload().await?;
        Ok(&self.tasks)
    }

    pub async fn add_task(&mut self, title: &str, date: NaiveDate) -> Result<Task, TaskError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskError::InvalidInput("task title is empty".to_string()));
        }
        let task = self
            .store
            .create(NewTask {
                title: title.to_string(),
                date,
            })
            .await?;
        if date == self.current_date {
            self.tasks.insert(0, task.clone());
        }
        log::info!("controller: added task_id={} date={date}", task.id);
        Ok(task)
    }

    /// Flips `completed`, keeping the reminder fields. A completed task loses
    /// its live timer; reopening re-arms it. Returns `None` when the task no
    /// longer exists.
    pub async fn toggle_task(&mut self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let Some(mut task) = self.load(id).await? else {
            return Ok(None);
        };
        task.completed = !task.completed;
        let saved = self.persist(task).await?;
        if let Some(task) = &saved {
            if task.completed {
                self.scheduler.forget(task.id);
            } else if task.has_live_notification() {
                self.scheduler.runner().schedule(task.clone());
            }
        }
        Ok(saved)
    }

    /// Deletes the task, then its live timer. A failed delete keeps both.
    pub async fn delete_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        self.store.delete(id).await?;
        self.scheduler.forget(id);
        self.tasks.retain(|task| task.id != id);
        log::info!("controller: deleted task_id={id}");
        Ok(())
    }

    pub async fn save_reminder(
        &mut self,
        id: TaskId,
        time_of_day: &str,
    ) -> Result<Option<Task>, TaskError> {
        let Some(task) = self.load(id).await? else {
            return Ok(None);
        };
        let saved = benign_not_found(self.scheduler.schedule(&task, time_of_day).await)?;
        Ok(saved.map(|task| self.refresh_cached(task)))
    }

    pub async fn remove_reminder(&mut self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let Some(task) = self.load(id).await? else {
            return Ok(None);
        };
        let saved = benign_not_found(self.scheduler.cancel(&task).await)?;
        Ok(saved.map(|task| self.refresh_cached(task)))
    }

    pub async fn handle_event(&mut self, event: ForegroundEvent) -> Result<EventOutcome, TaskError> {
        match event {
            ForegroundEvent::CompleteTask { task_id } => {
                let Some(mut task) = self.load(task_id).await? else {
                    return Ok(EventOutcome::Ignored);
                };
                if !task.completed {
                    task.completed = true;
                    match self.persist(task).await? {
                        Some(saved) => task = saved,
                        None => return Ok(EventOutcome::Ignored),
                    }
                }
                self.scheduler.forget(task_id);
                log::info!("controller: completed from notification task_id={task_id}");
                Ok(EventOutcome::Completed(task))
            }
            ForegroundEvent::OpenView { date, .. } => {
                self.select_date(date).await?;
                Ok(EventOutcome::Navigated(date))
            }
        }
    }

    async fn reload(&mut self) -> Result<(), TaskError> {
        self.tasks = self.store.list_by_date(self.current_date).await?;
        Ok(())
    }

    async fn load(&mut self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let task = self.store.get_by_id(id).await?;
        if task.is_none() {
            log::debug!("controller: task_id={id} vanished");
            self.tasks.retain(|task| task.id != id);
        }
        Ok(task)
    }

    async fn persist(&mut self, task: Task) -> Result<Option<Task>, TaskError> {
        let saved = benign_not_found(self.store.update(task).await.map_err(TaskError::from))?;
        Ok(saved.map(|task| self.refresh_cached(task)))
    }

    fn refresh_cached(&mut self, task: Task) -> Task {
        if let Some(cached) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *cached = task.clone();
        }
        task
    }
}

fn benign_not_found(result: Result<Task, TaskError>) -> Result<Option<Task>, TaskError> {
    match result {
        Ok(task) => Ok(Some(task)),
        Err(TaskError::NotFound(id)) => {
            log::debug!("controller: task_id={id} vanished mid-update");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotificationLocale;
    use crate::runner::{BackgroundRunner, RunnerConfig};
    use crate::testing::{FixedClock, RecordingNotifier, ScriptedPermission};
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Fixture {
        controller: TaskController,
        store: Arc<TaskStore>,
        scheduler: Arc<NotificationScheduler>,
        notifier: Arc<RecordingNotifier>,
        events: broadcast::Receiver<ForegroundEvent>,
    }

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn fixture() -> Fixture {
        fixture_with(TaskStore::in_memory())
    }

    fn fixture_with(store: TaskStore) -> Fixture {
        let store = Arc::new(store);
        let clock = Arc::new(FixedClock::at_utc(2025, 5, 31, 8, 0));
        let notifier = Arc::new(RecordingNotifier::default());
        let (events_tx, events) = broadcast::channel(8);
        let (runner, _join) = BackgroundRunner::new(
            RunnerConfig {
                notification_title: "Reminder".to_string(),
                locale: NotificationLocale::from_tag("en"),
            },
            notifier.clone(),
            clock.clone(),
            events_tx,
        )
        .spawn();
        let scheduler = Arc::new(NotificationScheduler::new(
            store.clone(),
            runner,
            Arc::new(ScriptedPermission::granted()),
            clock,
            Duration::from_secs(60),
        ));
        let controller = TaskController::new(store.clone(), scheduler.clone(), june(1));
        Fixture {
            controller,
            store,
            scheduler,
            notifier,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_task_lifecycle() {
        let mut f = fixture();
        f.controller.startup(true).await.unwrap();

        let task = f.controller.add_task("Buy milk", june(1)).await.unwrap();
        assert_eq!(task.id, 1);
        assert!(!task.completed);
        assert!(task.notification.is_none());

        let with_reminder = f
            .controller
            .save_reminder(task.id, "09:00")
            .await
            .unwrap()
            .expect("task exists");
        let reminder = with_reminder.notification.clone().unwrap();
        assert_eq!(reminder.time, "09:00");
        assert!(reminder
            .scheduled_for
            .naive_local()
            .to_string()
            .starts_with("2025-06-01 09:00:00"));

        let toggled = f.controller.toggle_task(task.id).await.unwrap().unwrap();
        assert!(toggled.completed);
        assert_eq!(toggled.notification, with_reminder.notification);
        assert!(f.controller.tasks()[0].completed);
        assert!(f.scheduler.runner().live_timers().await.is_empty());

        let reopened = f.controller.toggle_task(task.id).await.unwrap().unwrap();
        assert!(!reopened.completed);
        assert_eq!(f.scheduler.runner().live_timers().await, vec![task.id]);

        f.controller.delete_task(task.id).await.unwrap();
        assert!(f.store.list_by_date(june(1)).await.unwrap().is_empty());
        assert!(f.controller.tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_tasks_appear_at_top_of_selected_day() {
        let mut f = fixture();
        f.controller.select_date(june(1)).await.unwrap();
        let t1 = f.controller.add_task("first", june(1)).await.unwrap();
        let t2 = f.controller.add_task("second", june(1)).await.unwrap();
        f.controller.add_task("elsewhere", june(2)).await.unwrap();

        let cached: Vec<_> = f.controller.tasks().iter().map(|t| t.id).collect();
        assert_eq!(cached, vec![t2.id, t1.id]);

        let listed = f.controller.select_date(june(1)).await.unwrap();
        let listed: Vec<_> = listed.iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![t2.id, t1.id]);
        assert_eq!(
            f.controller.stats(),
            DayStats {
                total: 2,
                completed: 0,
                pending: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_title_is_rejected() {
        let mut f = fixture();
        let err = f.controller.add_task("   ", june(1)).await.expect_err("empty");
        assert!(matches!(err, TaskError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_task_with_reminder_stops_its_timer() {
        let mut f = fixture();
        let task = f.controller.add_task("Buy milk", june(1)).await.unwrap();
        f.controller.save_reminder(task.id, "09:00").await.unwrap();
        assert_eq!(f.scheduler.runner().live_timers().await, vec![task.id]);

        f.controller.delete_task(task.id).await.unwrap();
        assert!(f.scheduler.runner().live_timers().await.is_empty());

        tokio::time::sleep(Duration::from_secs(3 * 24 * 3600)).await;
        assert!(f.notifier.shown().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_keeps_task_and_timer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.sqlite3");
        let mut f = fixture_with(TaskStore::new(path.clone()));
        let task = f.controller.add_task("Buy milk", june(1)).await.unwrap();
        f.controller.save_reminder(task.id, "09:00").await.unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other
            .execute_batch("ALTER TABLE tasks RENAME TO tasks_moved;")
            .unwrap();
        let err = f.controller.delete_task(task.id).await.expect_err("table missing");
        assert_eq!(err.kind(), "storage");
        assert_eq!(f.scheduler.runner().live_timers().await, vec![task.id]);
        assert_eq!(f.controller.tasks().len(), 1);

        other
            .execute_batch("ALTER TABLE tasks_moved RENAME TO tasks;")
            .unwrap();
        let stored = f.store.get_by_id(task.id).await.unwrap().unwrap();
        assert!(stored.notification.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_tasks_are_benign_no_ops() {
        let mut f = fixture();
        assert_eq!(f.controller.toggle_task(77).await.unwrap(), None);
        assert_eq!(f.controller.save_reminder(77, "09:00").await.unwrap(), None);
        assert_eq!(f.controller.remove_reminder(77).await.unwrap(), None);
        f.controller.delete_task(77).await.unwrap();
        assert_eq!(
            f.controller
                .handle_event(ForegroundEvent::CompleteTask { task_id: 77 })
                .await
                .unwrap(),
            EventOutcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn complete_action_from_notification_persists() {
        let mut f = fixture();
        let task = f.controller.add_task("Buy milk", june(1)).await.unwrap();
        f.controller.save_reminder(task.id, "09:00").await.unwrap();

        f.scheduler.runner().interaction(
            task.id,
            june(1),
            crate::notifier::NotificationAction::Complete,
        );
        let event = f.events.recv().await.unwrap();
        let outcome = f.controller.handle_event(event).await.unwrap();

        match outcome {
            EventOutcome::Completed(done) => assert!(done.completed),
            other => panic!("unexpected outcome {other:?}"),
        }
        let stored = f.store.get_by_id(task.id).await.unwrap().unwrap();
        assert!(stored.completed);
        assert!(f.store.list_with_live_notifications().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn view_action_switches_selected_date() {
        let mut f = fixture();
        f.controller.add_task("later", june(5)).await.unwrap();
        let outcome = f
            .controller
            .handle_event(ForegroundEvent::OpenView {
                task_id: 1,
                date: june(5),
            })
            .await
            .unwrap();
        assert_eq!(outcome, EventOutcome::Navigated(june(5)));
        assert_eq!(f.controller.current_date(), june(5));
        assert_eq!(f.controller.tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_reminder_clears_cached_copy() {
        let mut f = fixture();
        f.controller.select_date(june(1)).await.unwrap();
        let task = f.controller.add_task("Buy milk", june(1)).await.unwrap();
        f.controller.save_reminder(task.id, "09:00").await.unwrap();
        assert!(f.controller.tasks()[0].notification.is_some());

        let cleared = f.controller.remove_reminder(task.id).await.unwrap().unwrap();
        assert!(cleared.notification.is_none());
        assert!(f.controller.tasks()[0].notification.is_none());
        assert!(f.scheduler.runner().live_timers().await.is_empty());
    }
}
