//! Stdin/stdout JSON bridge: the foreground surface of the app.
//!
//! Reads newline-delimited `CommandEnvelope`s, dispatches them through the
//! task controller one at a time, and writes `ResponseEnvelope`s plus
//! `HostEvent`s as JSON lines. Stdout carries only the protocol; logs go to
//! files and stderr.
//!
//! `respond_permission` is answered by the reader itself. A reminder waiting
//! on a permission prompt holds the dispatch loop, so the answer must not
//! queue behind it. The reader never waits on the dispatch queue either: a
//! command arriving while it is full is answered with a `busy` error.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::commands::{self, CommandResult};
use crate::controller::{EventOutcome, TaskController};
use crate::errors::TaskError;
use crate::events::{ForegroundEvent, HostEvent};
use crate::models::TaskId;
use crate::notifier::NotificationAction;
use crate::runner::RunnerHandle;
use crate::state::AppServices;

const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    ListTasks {
        date: NaiveDate,
    },
    AddTask {
        title: String,
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    ToggleTask {
        task_id: TaskId,
    },
    DeleteTask {
        task_id: TaskId,
    },
    SetReminder {
        task_id: TaskId,
        time: String,
    },
    ClearReminder {
        task_id: TaskId,
    },
    DayStats {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    NotificationAction {
        task_id: TaskId,
        date: NaiveDate,
        action: NotificationAction,
    },
    RespondPermission {
        granted: bool,
    },
    Resync,
    Shutdown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(flatten)]
    pub command: HostCommand,
}

#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    pub id: serde_json::Value,
    #[serde(flatten)]
    pub result: CommandResult<serde_json::Value>,
}

type SharedWriter<W> = Arc<Mutex<W>>;

/// Runs until stdin closes or `shutdown` is received.
pub async fn run_bridge<R, W>(
    services: &AppServices,
    controller: TaskController,
    input: R,
    output: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(output));

    let event_writer = Arc::clone(&writer);
    let event_rx = services.host_events.subscribe();
    let event_handle = tokio::spawn(forward_events(event_rx, event_writer));

    let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
    let dispatch_handle = tokio::spawn(dispatch_loop(
        controller,
        services.runner().clone(),
        request_rx,
        services.foreground_events.subscribe(),
        services.host_events.clone(),
        Arc::clone(&writer),
    ));

    let reader_result = read_commands(services, input, request_tx, Arc::clone(&writer)).await;

    // Dropping the request sender ends the dispatch loop after queued work.
    if dispatch_handle.await.is_err() {
        log::error!("host: dispatch loop panicked");
    }
    event_handle.abort();
    let _ = event_handle.await;
    reader_result
}

async fn read_commands<R, W>(
    services: &AppServices,
    mut input: R,
    requests: mpsc::Sender<CommandEnvelope>,
    writer: SharedWriter<W>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 {
            log::info!("host: input closed");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(envelope) => envelope,
            Err(error) => {
                log::warn!("host: unparseable command {error}");
                let response = ResponseEnvelope {
                    id: serde_json::Value::Null,
                    result: commands::err(&TaskError::InvalidInput(format!(
                        "unparseable command: {error}"
                    ))),
                };
                write_json(&writer, &response).await?;
                continue;
            }
        };

        if let HostCommand::RespondPermission { granted } = envelope.command {
            let delivered = services.permission.respond(granted);
            if delivered {
                services.remember_permission(granted);
            }
            let response = ResponseEnvelope {
                id: envelope.id,
                result: commands::ok(delivered).into_value(),
            };
            write_json(&writer, &response).await?;
            continue;
        }

        let is_shutdown = envelope.command == HostCommand::Shutdown;
        match requests.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                log::warn!("host: dispatch queue full, rejecting id={}", envelope.id);
                let response = ResponseEnvelope {
                    id: envelope.id,
                    result: commands::err(&TaskError::Busy),
                };
                write_json(&writer, &response).await?;
                continue;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::error!("host: dispatch loop is gone");
                break;
            }
        }
        if is_shutdown {
            log::info!("host: shutdown requested");
            break;
        }
    }
    Ok(())
}

async fn dispatch_loop<W>(
    mut controller: TaskController,
    runner: RunnerHandle,
    mut requests: mpsc::Receiver<CommandEnvelope>,
    mut foreground: broadcast::Receiver<ForegroundEvent>,
    host_events: broadcast::Sender<HostEvent>,
    writer: SharedWriter<W>,
) where
    W: AsyncWrite + Unpin,
{
    let mut foreground_open = true;
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(envelope) = request else { break };
                let result = dispatch(&mut controller, &runner, envelope.command).await;
                let response = ResponseEnvelope { id: envelope.id, result };
                if let Err(error) = write_json(&writer, &response).await {
                    log::warn!("host: response write failed, stopping dispatch: {error}");
                    break;
                }
            }
            event = foreground.recv(), if foreground_open => match event {
                Ok(event) => on_foreground_event(&mut controller, &host_events, event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("host: foreground events lagged skipped={skipped}");
                }
                Err(broadcast::error::RecvError::Closed) => foreground_open = false,
            },
        }
    }
    log::info!("host: dispatch loop stopped");
}

async fn dispatch(
    ctl: &mut TaskController,
    runner: &RunnerHandle,
    command: HostCommand,
) -> CommandResult<serde_json::Value> {
    match command {
        HostCommand::ListTasks { date } => commands::list_tasks(ctl, date).await.into_value(),
        HostCommand::AddTask { title, date } => {
            commands::add_task(ctl, &title, date).await.into_value()
        }
        HostCommand::ToggleTask { task_id } => {
            commands::toggle_task(ctl, task_id).await.into_value()
        }
        HostCommand::DeleteTask { task_id } => {
            commands::delete_task(ctl, task_id).await.into_value()
        }
        HostCommand::SetReminder { task_id, time } => {
            commands::set_reminder(ctl, task_id, &time).await.into_value()
        }
        HostCommand::ClearReminder { task_id } => {
            commands::clear_reminder(ctl, task_id).await.into_value()
        }
        HostCommand::DayStats { date } => commands::day_stats(ctl, date).await.into_value(),
        HostCommand::NotificationAction {
            task_id,
            date,
            action,
        } => commands::notification_action(runner, task_id, date, action).into_value(),
        HostCommand::Resync => commands::resync(ctl).await.into_value(),
        HostCommand::Shutdown => commands::ok(true).into_value(),
        // Answered by the reader.
        HostCommand::RespondPermission { .. } => commands::ok(false).into_value(),
    }
}

async fn on_foreground_event(
    ctl: &mut TaskController,
    host_events: &broadcast::Sender<HostEvent>,
    event: ForegroundEvent,
) {
    let host_event = match ctl.handle_event(event).await {
        Ok(EventOutcome::Completed(task)) => HostEvent::TaskCompleted { task },
        Ok(EventOutcome::Navigated(date)) => HostEvent::OpenView { date },
        Ok(EventOutcome::Ignored) => return,
        Err(error) => {
            log::warn!("host: foreground event failed kind={} {error}", error.kind());
            return;
        }
    };
    if host_events.send(host_event).is_err() {
        log::debug!("host: no event listener");
    }
}

async fn forward_events<W>(mut events: broadcast::Receiver<HostEvent>, writer: SharedWriter<W>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(error) = write_json(&writer, &event).await {
                    log::warn!("host: event write failed, stopping forwarder: {error}");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("host: event forwarder lagged skipped={skipped}");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_json<W, T>(writer: &SharedWriter<W>, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut guard = writer.lock().await;
    guard.write_all(&line).await?;
    guard.flush().await
}
