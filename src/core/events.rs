//! Application event definitions

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Non-blocking message shown to the user
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Events the core emits towards the presentation layer
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Something worth telling the user (failures are never swallowed)
    Notification(Notification),

    /// Show/hide the loading indicator
    LoadingChanged(bool),

    /// Activation state changed; carries the new token
    ActivationChanged(u64),
}

/// Wrapper around `mpsc::UnboundedSender<AppEvent>`.
///
/// Sending never fails from the caller's point of view: with no front end
/// listening, events are simply dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end for a front end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.send(AppEvent::Notification(Notification::new(level, message)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(NotificationLevel::Error, message);
    }
}

/// Strictly increasing "activation changed" token.
///
/// Anything that polls runtime status subscribes and re-polls whenever the
/// token moves.
pub struct ActivationSignal {
    counter: AtomicU64,
    tx: watch::Sender<u64>,
}

impl Default for ActivationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            counter: AtomicU64::new(0),
            tx,
        }
    }

    /// Publish a new token and return it
    pub fn bump(&self) -> u64 {
        let token = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        // Racing bumps may publish out of order; never move backwards
        self.tx.send_modify(|current| *current = (*current).max(token));
        token
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}
