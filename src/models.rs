use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = i64;

/// A reminder attached to a task: the wall-clock time the user picked and the
/// absolute instant it resolves to on the task's date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Reminder {
    pub time: String,
    pub scheduled_for: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub date: NaiveDate,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notification: Option<Reminder>,
}

impl Task {
    /// True when the task still wants a reminder: one is set and the task is open.
    pub fn has_live_notification(&self) -> bool {
        self.notification.is_some() && !self.completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NewTask {
    pub title: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Default,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct DayStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl DayStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let completed = tasks.iter().filter(|task| task.completed).count();
        Self {
            total: tasks.len(),
            completed,
            pending: tasks.len() - completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    #[serde(default = "default_notification_title")]
    pub notification_title: String,
    #[serde(default)]
    pub permission: PermissionState,
    #[serde(default = "default_permission_timeout_secs")]
    pub permission_timeout_secs: u64,
    #[serde(default = "default_prune_on_start")]
    pub prune_on_start: bool,
    #[serde(default)]
    pub locale: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notification_title: default_notification_title(),
            permission: PermissionState::Default,
            permission_timeout_secs: default_permission_timeout_secs(),
            prune_on_start: default_prune_on_start(),
            locale: None,
        }
    }
}

fn default_notification_title() -> String {
    "⏰ Task reminder".to_string()
}

fn default_permission_timeout_secs() -> u64 {
    60
}

fn default_prune_on_start() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SettingsFile {
    pub schema_version: u32,
    pub settings: Settings,
}
