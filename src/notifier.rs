use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::HostEvent;
use crate::models::{Task, TaskId};

const RTL_LANGUAGES: &[&str] = &["he", "iw", "ar", "fa", "ur"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Complete,
    View,
    /// Body click without a specific action button.
    Open,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextDirection {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ActionButton {
    pub action: NotificationAction,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationData {
    pub task_id: TaskId,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SystemNotification {
    pub title: String,
    pub body: String,
    /// Same tag for the same task, so a re-fire replaces instead of stacking.
    pub tag: String,
    pub require_interaction: bool,
    pub lang: String,
    pub dir: TextDirection,
    pub actions: Vec<ActionButton>,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationLocale {
    pub lang: String,
    pub dir: TextDirection,
}

impl NotificationLocale {
    /// Uses the configured locale, else the OS locale, else English.
    pub fn resolve(configured: Option<&str>) -> Self {
        let lang = configured
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty())
            .or_else(sys_locale::get_locale)
            .unwrap_or_else(|| "en".to_string());
        Self::from_tag(&lang)
    }

    pub fn from_tag(tag: &str) -> Self {
        let primary = tag
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let dir = if RTL_LANGUAGES.contains(&primary.as_str()) {
            TextDirection::Rtl
        } else {
            TextDirection::Ltr
        };
        Self {
            lang: tag.trim().to_string(),
            dir,
        }
    }
}

impl SystemNotification {
    pub fn for_task(task: &Task, title: &str, locale: &NotificationLocale) -> Self {
        Self {
            title: title.to_string(),
            body: task.title.clone(),
            tag: format!("task-{}", task.id),
            require_interaction: true,
            lang: locale.lang.clone(),
            dir: locale.dir,
            actions: vec![
                ActionButton {
                    action: NotificationAction::Complete,
                    title: "Mark complete".to_string(),
                },
                ActionButton {
                    action: NotificationAction::View,
                    title: "View task".to_string(),
                },
            ],
            data: NotificationData {
                task_id: task.id,
                date: task.date,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification display failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Platform surface that displays a system notification.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &SystemNotification) -> Result<(), NotifyError>;
}

/// Hands notifications to the host bridge, which renders them on its side.
pub struct HostNotifier {
    events: broadcast::Sender<HostEvent>,
}

impl HostNotifier {
    pub fn new(events: broadcast::Sender<HostEvent>) -> Self {
        Self { events }
    }
}

impl Notifier for HostNotifier {
    fn show(&self, notification: &SystemNotification) -> Result<(), NotifyError> {
        self.events
            .send(HostEvent::Notification {
                notification: notification.clone(),
            })
            .map(|_| ())
            .map_err(|_| NotifyError("no host is listening".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_task() -> Task {
        Task {
            id: 7,
            title: "Buy milk".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            completed: false,
            created_at: Utc.with_ymd_and_hms(2025, 5, 30, 8, 0, 0).unwrap(),
            notification: None,
        }
    }

    #[test]
    fn payload_carries_tag_actions_and_routing_data() {
        let locale = NotificationLocale::from_tag("en-US");
        let notification = SystemNotification::for_task(&make_task(), "Reminder", &locale);

        assert_eq!(notification.title, "Reminder");
        assert_eq!(notification.body, "Buy milk");
        assert_eq!(notification.tag, "task-7");
        assert!(notification.require_interaction);
        let actions: Vec<_> = notification.actions.iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            vec![NotificationAction::Complete, NotificationAction::View]
        );
        assert_eq!(notification.data.task_id, 7);
        assert_eq!(notification.data.date.to_string(), "2025-06-01");
    }

    #[test]
    fn locale_direction_follows_primary_language() {
        assert_eq!(NotificationLocale::from_tag("he-IL").dir, TextDirection::Rtl);
        assert_eq!(NotificationLocale::from_tag("ar_EG").dir, TextDirection::Rtl);
        assert_eq!(NotificationLocale::from_tag("en-GB").dir, TextDirection::Ltr);
        assert_eq!(NotificationLocale::resolve(Some("fa")).lang, "fa");
    }

    #[test]
    fn host_notifier_fails_without_listeners() {
        let (events, rx) = broadcast::channel(4);
        drop(rx);
        let notifier = HostNotifier::new(events);
        let locale = NotificationLocale::from_tag("en");
        let notification = SystemNotification::for_task(&make_task(), "Reminder", &locale);
        assert!(notifier.show(&notification).is_err());
    }

    #[test]
    fn host_notifier_forwards_payload() {
        let (events, mut rx) = broadcast::channel(4);
        let notifier = HostNotifier::new(events);
        let locale = NotificationLocale::from_tag("en");
        let notification = SystemNotification::for_task(&make_task(), "Reminder", &locale);
        notifier.show(&notification).unwrap();
        match rx.try_recv().unwrap() {
            HostEvent::Notification { notification: got } => assert_eq!(got, notification),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
