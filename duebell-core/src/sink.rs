//! NotificationSink port: where reminders surface to the user.
//!
//! The engine never assumes delivery succeeds. Concrete desktop sinks live
//! in the CLI; [`InAppSink`] is a banner queue a UI can drain.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{ReminderError, Result};
use crate::reminders::{Notification, ReminderKey};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authorization {
    Granted,
    Denied,
}

/// Platform permission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Unsupported,
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

pub trait NotificationSink {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> Result<()>;

    fn is_available(&self) -> bool;

    /// Interactive permission prompt, where the platform has one.
    fn request_authorization(&mut self) -> Authorization;
}

impl<S: NotificationSink + ?Sized> NotificationSink for Box<S> {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> Result<()> {
        (**self).deliver(key, task)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn request_authorization(&mut self) -> Authorization {
        (**self).request_authorization()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub key: ReminderKey,
    pub notification: Notification,
}

#[derive(Debug)]
struct InAppState {
    permission: PermissionState,
    banners: Vec<Banner>,
}

/// In-app banner queue. Clones share the queue.
#[derive(Debug, Clone)]
pub struct InAppSink {
    state: Arc<Mutex<InAppState>>,
}

impl Default for InAppSink {
    fn default() -> Self {
        Self::new(PermissionState::Granted)
    }
}

impl InAppSink {
    pub fn new(permission: PermissionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(InAppState {
                permission,
                banners: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InAppState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn permission(&self) -> PermissionState {
        self.lock().permission
    }

    pub fn set_permission(&self, permission: PermissionState) {
        self.lock().permission = permission;
    }

    /// Banners delivered so far, oldest first.
    pub fn banners(&self) -> Vec<Banner> {
        self.lock().banners.clone()
    }

    pub fn drain(&self) -> Vec<Banner> {
        std::mem::take(&mut self.lock().banners)
    }
}

impl NotificationSink for InAppSink {
    fn deliver(&mut self, key: &ReminderKey, task: &Task) -> Result<()> {
        let mut state = self.lock();
        if state.permission != PermissionState::Granted {
            return Err(ReminderError::PermissionDenied(format!(
                "in-app banners are {:?}",
                state.permission
            )));
        }
        state.banners.push(Banner {
            key: key.clone(),
            notification: Notification::for_reminder(key.kind, task),
        });
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.permission() == PermissionState::Granted
    }

    fn request_authorization(&mut self) -> Authorization {
        let mut state = self.lock();
        match state.permission {
            PermissionState::Granted => Authorization::Granted,
            PermissionState::Default => {
                state.permission = PermissionState::Granted;
                Authorization::Granted
            }
            PermissionState::Denied | PermissionState::Unsupported => Authorization::Denied,
        }
    }
}
