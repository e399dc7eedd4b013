//! Fakes for the runtime seams, shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use crate::models::PermissionState;
use crate::notifier::{Notifier, NotifyError, SystemNotification};
use crate::permission::PermissionProvider;
use crate::reminder::Clock;

pub(crate) struct FixedClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub(crate) fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(crate) fn at_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Self {
        let at = Utc
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap();
        Self::new(at.fixed_offset())
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    shown: Mutex<Vec<SystemNotification>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn shown(&self) -> Vec<SystemNotification> {
        self.shown.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: &SystemNotification) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(NotifyError("denied at display time".to_string()));
        }
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Answers every prompt with a fixed state and counts prompts.
pub(crate) struct ScriptedPermission {
    state: Mutex<PermissionState>,
    answer: PermissionState,
    supported: bool,
    prompts: AtomicUsize,
}

impl ScriptedPermission {
    pub(crate) fn new(initial: PermissionState, answer: PermissionState) -> Self {
        Self {
            state: Mutex::new(initial),
            answer,
            supported: true,
            prompts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn granted() -> Self {
        Self::new(PermissionState::Granted, PermissionState::Granted)
    }

    pub(crate) fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::granted()
        }
    }

    pub(crate) fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionProvider for ScriptedPermission {
    fn supported(&self) -> bool {
        self.supported
    }

    fn status(&self) -> PermissionState {
        *self.state.lock().unwrap()
    }

    async fn request(&self) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = self.answer;
        self.answer
    }
}

/// A prompt the platform never answers.
pub(crate) struct SilentPermission;

#[async_trait]
impl PermissionProvider for SilentPermission {
    fn status(&self) -> PermissionState {
        PermissionState::Default
    }

    async fn request(&self) -> PermissionState {
        std::future::pending().await
    }
}
