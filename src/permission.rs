//! Notification permission model.
//!
//! Scheduling needs `Granted`; a `Default` state prompts once through the
//! provider. The prompt itself may never answer, so callers bound it with a
//! timeout.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::events::HostEvent;
use crate::models::PermissionState;

#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Whether the platform can display notifications at all.
    fn supported(&self) -> bool {
        true
    }

    fn status(&self) -> PermissionState;

    /// Asks the user; resolves to the resulting state.
    async fn request(&self) -> PermissionState;
}

/// Prompts the host surface with a `permission_requested` event and waits for
/// [`PromptPermission::respond`].
pub struct PromptPermission {
    state: Mutex<PermissionState>,
    pending: Mutex<Option<oneshot::Sender<bool>>>,
    events: broadcast::Sender<HostEvent>,
}

impl PromptPermission {
    pub fn new(initial: PermissionState, events: broadcast::Sender<HostEvent>) -> Self {
        Self {
            state: Mutex::new(initial),
            pending: Mutex::new(None),
            events,
        }
    }

    /// Delivers the user's answer. Returns false when no prompt was pending.
    pub fn respond(&self, granted: bool) -> bool {
        let sender = match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(granted).is_ok(),
            None => {
                log::warn!("permission: response granted={granted} with no pending prompt");
                false
            }
        }
    }

    fn set_state(&self, next: PermissionState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = next;
        }
    }
}

#[async_trait]
impl PermissionProvider for PromptPermission {
    fn status(&self) -> PermissionState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(PermissionState::Denied)
    }

    async fn request(&self) -> PermissionState {
        let current = self.status();
        if current != PermissionState::Default {
            return current;
        }

        let (tx, rx) = oneshot::channel();
        match self.pending.lock() {
            // A newer prompt replaces an unanswered one; the old waiter sees a closed channel.
            Ok(mut guard) => *guard = Some(tx),
            Err(_) => return PermissionState::Denied,
        }
        if self.events.send(HostEvent::PermissionRequested).is_err() {
            log::warn!("permission: no host listening for the prompt");
        }

        match rx.await {
            Ok(true) => {
                self.set_state(PermissionState::Granted);
                log::info!("permission: granted");
                PermissionState::Granted
            }
            Ok(false) => {
                self.set_state(PermissionState::Denied);
                log::info!("permission: denied");
                PermissionState::Denied
            }
            // Superseded prompt: leave the state undetermined.
            Err(_) => PermissionState::Default,
        }
    }
}
