use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config;
use crate::controller::TaskController;
use crate::events::{ForegroundEvent, HostEvent};
use crate::models::{PermissionState, Settings};
use crate::notifier::{HostNotifier, NotificationLocale, Notifier};
use crate::permission::PromptPermission;
use crate::reminder::{Clock, SystemClock};
use crate::runner::{BackgroundRunner, RunnerConfig, RunnerHandle};
use crate::scheduler::NotificationScheduler;
use crate::storage::TaskStore;

const HOST_EVENT_CAPACITY: usize = 128;
const FOREGROUND_EVENT_CAPACITY: usize = 64;

/// Long-lived services, wired once at start and shared by the host bridge.
pub struct AppServices {
    pub store: Arc<TaskStore>,
    pub scheduler: Arc<NotificationScheduler>,
    pub permission: Arc<PromptPermission>,
    pub host_events: broadcast::Sender<HostEvent>,
    pub foreground_events: broadcast::Sender<ForegroundEvent>,
    settings: Mutex<Settings>,
    data_dir: Option<PathBuf>,
    runner_join: JoinHandle<()>,
}

impl AppServices {
    /// Must be called inside a tokio runtime: the runner is spawned here.
    pub fn start(store: TaskStore, settings: Settings, data_dir: Option<PathBuf>) -> Self {
        Self::start_with_clock(store, settings, data_dir, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        store: TaskStore,
        settings: Settings,
        data_dir: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (host_events, _) = broadcast::channel(HOST_EVENT_CAPACITY);
        let (foreground_events, _) = broadcast::channel(FOREGROUND_EVENT_CAPACITY);
        let store = Arc::new(store);

        let notifier: Arc<dyn Notifier> = Arc::new(HostNotifier::new(host_events.clone()));
        let runner = BackgroundRunner::new(
            RunnerConfig {
                notification_title: settings.notification_title.clone(),
                locale: NotificationLocale::resolve(settings.locale.as_deref()),
            },
            notifier,
            clock.clone(),
            foreground_events.clone(),
        );
        let (runner_handle, runner_join) = runner.spawn();

        let permission = Arc::new(PromptPermission::new(
            settings.permission,
            host_events.clone(),
        ));
        let scheduler = Arc::new(NotificationScheduler::new(
            store.clone(),
            runner_handle,
            permission.clone(),
            clock,
            Duration::from_secs(settings.permission_timeout_secs),
        ));

        Self {
            store,
            scheduler,
            permission,
            host_events,
            foreground_events,
            settings: Mutex::new(settings),
            data_dir,
            runner_join,
        }
    }

    pub fn runner(&self) -> &RunnerHandle {
        self.scheduler.runner()
    }

    pub fn settings(&self) -> Settings {
        self.settings
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn controller(&self, today: NaiveDate) -> TaskController {
        TaskController::new(self.store.clone(), self.scheduler.clone(), today)
    }

    /// Records a prompt answer so the next start does not ask again.
    pub fn remember_permission(&self, granted: bool) {
        let state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        let next = match self.settings.lock() {
            Ok(mut guard) => {
                guard.permission = state;
                guard.clone()
            }
            Err(_) => return,
        };
        if let Some(root) = &self.data_dir {
            if let Err(err) = config::save_settings(root, &next) {
                log::warn!("state: could not persist permission={state:?}: {err}");
            }
        }
    }

    /// Stops the runner, which aborts its live timers, and waits for it.
    pub async fn shutdown(self) {
        self.scheduler.runner().stop();
        if self.runner_join.await.is_err() {
            log::error!("state: runner task panicked");
        }
        log::info!("state: services stopped");
    }
}
