//! Background runner: owns the live reminder timers.
//!
//! The runner keeps no durable state. Its timer map is a cache rebuilt from
//! the task store through `UPDATE_NOTIFICATIONS` + `SCHEDULE_NOTIFICATION`
//! (see `NotificationScheduler::resync_all`). Only the runner loop touches the
//! map; timer tasks report back through an internal channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::events::{ForegroundEvent, RunnerCommand, RunnerMessage};
use crate::models::{Task, TaskId};
use crate::notifier::{NotificationAction, NotificationLocale, Notifier, SystemNotification};
use crate::reminder::Clock;

/// Cheap, cloneable sender side of the runner. Commands queue until the
/// runner loop starts, so sending never waits for readiness.
#[derive(Clone)]
pub struct RunnerHandle {
    tx: mpsc::UnboundedSender<RunnerCommand>,
}

impl RunnerHandle {
    pub fn send(&self, message: RunnerMessage) -> bool {
        self.send_command(message.into())
    }

    pub fn schedule(&self, task: Task) -> bool {
        self.send(RunnerMessage::ScheduleNotification { task })
    }

    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.send(RunnerMessage::CancelNotification { task_id })
    }

    pub fn update_all(&self) -> bool {
        self.send(RunnerMessage::UpdateNotifications)
    }

    /// Platform callback for a click on a displayed notification.
    pub fn interaction(&self, task_id: TaskId, date: NaiveDate, action: NotificationAction) -> bool {
        self.send_command(RunnerCommand::Interaction {
            task_id,
            date,
            action,
        })
    }

    /// Ids with a live timer, ascending. Empty when the runner is gone.
    pub async fn live_timers(&self) -> Vec<TaskId> {
        let (reply, rx) = oneshot::channel();
        if !self.send_command(RunnerCommand::LiveTimers { reply }) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Asks the loop to clear its timers and exit.
    pub fn stop(&self) -> bool {
        self.send_command(RunnerCommand::Stop)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send_command(&self, command: RunnerCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("runner: dropped command, runner stopped: {:?}", err.0);
                false
            }
        }
    }
}

/// Creates the command queue ahead of the runner itself.
pub fn runner_channel() -> (RunnerHandle, mpsc::UnboundedReceiver<RunnerCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RunnerHandle { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub notification_title: String,
    pub locale: NotificationLocale,
}

struct LiveTimer {
    generation: u64,
    task: Task,
    handle: JoinHandle<()>,
}

// A dropped JoinHandle only detaches its task; the sleep must not outlive the entry.
impl Drop for LiveTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct Fired {
    task_id: TaskId,
    generation: u64,
}

pub struct BackgroundRunner {
    config: RunnerConfig,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ForegroundEvent>,
    timers: HashMap<TaskId, LiveTimer>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<Fired>,
    fired_rx: Option<mpsc::UnboundedReceiver<Fired>>,
}

impl BackgroundRunner {
    pub fn new(
        config: RunnerConfig,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<ForegroundEvent>,
    ) -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            config,
            notifier,
            clock,
            events,
            timers: HashMap::new(),
            next_generation: 0,
            fired_tx,
            fired_rx: Some(fired_rx),
        }
    }

    /// Starts the runner on its own task and returns its handle.
    pub fn spawn(self) -> (RunnerHandle, JoinHandle<()>) {
        let (handle, rx) = runner_channel();
        let join = tokio::spawn(self.run(rx));
        (handle, join)
    }

    /// Runs until a `Stop` command or until every `RunnerHandle` is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RunnerCommand>) {
        let Some(mut fired_rx) = self.fired_rx.take() else {
            log::error!("runner: started twice");
            return;
        };
        log::info!("runner: started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RunnerCommand::Stop) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(fired) = fired_rx.recv() => self.on_fired(fired),
            }
        }
        self.clear_all();
        log::info!("runner: stopped");
    }

    fn handle(&mut self, command: RunnerCommand) {
        match command {
            RunnerCommand::Message(RunnerMessage::ScheduleNotification { task }) => {
                self.on_schedule(task)
            }
            RunnerCommand::Message(RunnerMessage::CancelNotification { task_id }) => {
                self.on_cancel(task_id)
            }
            RunnerCommand::Message(RunnerMessage::UpdateNotifications) => self.clear_all(),
            RunnerCommand::Interaction {
                task_id,
                date,
                action,
            } => self.on_interaction(task_id, date, action),
            RunnerCommand::LiveTimers { reply } => {
                let mut ids: Vec<_> = self.timers.keys().copied().collect();
                ids.sort_unstable();
                let _ = reply.send(ids);
            }
            RunnerCommand::Stop => {}
        }
    }

    fn on_schedule(&mut self, task: Task) {
        let Some(reminder) = task.notification.as_ref() else {
            log::debug!("runner: schedule ignored task_id={} no reminder", task.id);
            return;
        };
        let delay = match (reminder.scheduled_for - self.clock.now()).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                log::info!(
                    "runner: schedule ignored task_id={} already due at {}",
                    task.id,
                    reminder.scheduled_for
                );
                return;
            }
        };

        // Cancel-then-set: the old timer can no longer report.
        self.on_cancel(task.id);
        self.next_generation += 1;
        let generation = self.next_generation;
        let task_id = task.id;
        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(Fired {
                task_id,
                generation,
            });
        });
        log::info!(
            "runner: scheduled task_id={task_id} at={} delay_secs={}",
            reminder.scheduled_for,
            delay.as_secs()
        );
        self.timers.insert(
            task_id,
            LiveTimer {
                generation,
                task,
                handle,
            },
        );
    }

    fn on_cancel(&mut self, task_id: TaskId) {
        if self.timers.remove(&task_id).is_some() {
            log::info!("runner: cancelled task_id={task_id}");
        }
    }

    fn on_fired(&mut self, fired: Fired) {
        let current = self
            .timers
            .get(&fired.task_id)
            .is_some_and(|timer| timer.generation == fired.generation);
        if !current {
            log::debug!(
                "runner: stale fire dropped task_id={} generation={}",
                fired.task_id,
                fired.generation
            );
            return;
        }
        // The entry goes away whether or not the display succeeds.
        let Some(timer) = self.timers.remove(&fired.task_id) else {
            return;
        };
        let notification = SystemNotification::for_task(
            &timer.task,
            &self.config.notification_title,
            &self.config.locale,
        );
        match self.notifier.show(&notification) {
            Ok(()) => log::info!("runner: fired task_id={}", fired.task_id),
            Err(err) => log::warn!("runner: fire failed task_id={} {err}", fired.task_id),
        }
    }

    fn on_interaction(&mut self, task_id: TaskId, date: NaiveDate, action: NotificationAction) {
        let event = match action {
            NotificationAction::Complete => ForegroundEvent::CompleteTask { task_id },
            NotificationAction::View | NotificationAction::Open => {
                ForegroundEvent::OpenView { task_id, date }
            }
        };
        if self.events.send(event).is_err() {
            log::warn!("runner: no foreground connected for {action:?} task_id={task_id}");
        }
    }

    fn clear_all(&mut self) {
        let count = self.timers.len();
        self.timers.clear();
        if count > 0 {
            log::info!("runner: cleared {count} live timers");
        }
    }
}
