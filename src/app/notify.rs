//! User-facing notifications
//!
//! Every user-triggered task emits an INFO notification when it starts and a
//! SUCCESS or ERROR notification when it ends. Emission is fire-and-forget:
//! [`Notifier::emit`] never fails and never blocks the caller, so a broken
//! notification sink cannot fail a task.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Notification severity as shown in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Info,
    Success,
    Error,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Info => "INFO",
            NotificationStatus::Success => "SUCCESS",
            NotificationStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable progress/status event for one user and operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_type: String,
    pub status: NotificationStatus,
    pub operation: String,
    pub message: String,
    pub user: String,
    pub extra: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        event_type: impl Into<String>,
        status: NotificationStatus,
        operation: impl Into<String>,
        message: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            status,
            operation: operation.into(),
            message: message.into(),
            user: user.into(),
            extra: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }
}

/// Sink for notifications
///
/// Implementations must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn emit(&self, notification: Notification);
}

/// Writes notifications to the log; used by the CLI
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn emit(&self, n: Notification) {
        match n.status {
            NotificationStatus::Info | NotificationStatus::Success => {
                info!(user = %n.user, operation = %n.operation, "{}", n.message)
            }
            NotificationStatus::Error => {
                error!(user = %n.user, operation = %n.operation, extra = ?n.extra, "{}", n.message)
            }
        }
    }
}

/// Forwards notifications to a channel consumed by a delivery layer
///
/// Uses `try_send`, so a full or closed channel drops the notification with a
/// log line instead of blocking the task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Create a notifier and the receiving end of its channel
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            match e {
                mpsc::error::TrySendError::Full(n) => {
                    warn!(
                        "Notification channel full, dropping {} for {}",
                        n.operation, n.user
                    );
                }
                mpsc::error::TrySendError::Closed(n) => {
                    debug!(
                        "Notification channel closed, dropping {} for {}",
                        n.operation, n.user
                    );
                }
            }
        }
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn with_status(&self, status: NotificationStatus) -> Vec<Notification> {
        self.lock()
            .iter()
            .filter(|n| n.status == status)
            .cloned()
            .collect()
    }

    pub fn count(&self, status: NotificationStatus) -> usize {
        self.lock().iter().filter(|n| n.status == status).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for MemoryNotifier {
    fn emit(&self, notification: Notification) {
        self.lock().push(notification);
    }
}
