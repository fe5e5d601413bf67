//! User-facing notifications.
//!
//! Every notice is logged through `tracing`. When a front end subscribes, the
//! notice is also forwarded over an unbounded channel; with no subscriber,
//! the log line is the only record.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Clone, Default)]
pub struct Notifier {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Notice>>>>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a receiver. Replaces any previous subscriber.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notice> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(NoticeLevel::Error, message.into());
    }

    fn send(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => info!(%message, "notice"),
            NoticeLevel::Warning => warn!(%message, "notice"),
            NoticeLevel::Error => error!(%message, "notice"),
        }
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            if tx.send(Notice { level, message }).is_err() {
                // Receiver dropped; stop forwarding.
                *guard = None;
            }
        }
    }
}
