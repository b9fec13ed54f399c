//! Progress notification sinks.
//!
//! A notification is shown when tracking starts, updated as fragments arrive
//! and resolved exactly once as success or failure, or dismissed when the
//! tracked run changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::errors::TrackerError;

/// Identifier of one notification shown by a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NotificationHandle(pub u64);

/// Where progress notifications go (a toast layer, a terminal, a log).
pub trait NotificationSink: Send + Sync {
    /// Shows a new in-progress notification.
    fn show(&self, message: &str) -> NotificationHandle;
    /// Replaces the message of an in-progress notification.
    fn update(&self, handle: NotificationHandle, message: &str);
    /// Turns the notification into a success message.
    fn resolve_success(&self, handle: NotificationHandle, message: &str);
    /// Turns the notification into a failure message.
    fn resolve_failure(&self, handle: NotificationHandle, message: &str);
    /// Removes the notification without resolving it.
    fn dismiss(&self, handle: NotificationHandle);
}

type ProgressFormatter = Arc<dyn Fn(&str) -> String + Send + Sync>;
type ErrorFormatter = Arc<dyn Fn(&TrackerError) -> String + Send + Sync>;

/// Caller overrides for notification messages.
#[derive(Clone, Default)]
pub struct NotificationText {
    on_progress: Option<ProgressFormatter>,
    on_success: Option<String>,
    on_error: Option<ErrorFormatter>,
}

impl NotificationText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats the progress message from the full stream text received so far
    /// (fragments joined by newlines; empty before the first fragment).
    pub fn on_progress(mut self, format: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(format));
        self
    }

    pub fn on_success(mut self, message: impl Into<String>) -> Self {
        self.on_success = Some(message.into());
        self
    }

    pub fn on_error(
        mut self,
        format: impl Fn(&TrackerError) -> String + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(format));
        self
    }

    pub(crate) fn progress(&self, full_text: &str) -> Option<String> {
        self.on_progress.as_ref().map(|format| format(full_text))
    }

    pub(crate) fn success(&self, default: &str) -> String {
        self.on_success
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    pub(crate) fn error(&self, error: &TrackerError) -> String {
        match &self.on_error {
            Some(format) => format(error),
            None => error.to_string(),
        }
    }
}

impl std::fmt::Debug for NotificationText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationText")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_success", &self.on_success)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Sink that emits every notification operation as a `tracing` event.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSink for LogNotifier {
    fn show(&self, message: &str) -> NotificationHandle {
        let handle = NotificationHandle(self.next.fetch_add(1, Ordering::Relaxed));
        info!(notification = handle.0, "{message}");
        handle
    }

    fn update(&self, handle: NotificationHandle, message: &str) {
        info!(notification = handle.0, "{message}");
    }

    fn resolve_success(&self, handle: NotificationHandle, message: &str) {
        info!(notification = handle.0, outcome = "success", "{message}");
    }

    fn resolve_failure(&self, handle: NotificationHandle, message: &str) {
        info!(notification = handle.0, outcome = "failure", "{message}");
    }

    fn dismiss(&self, handle: NotificationHandle) {
        info!(notification = handle.0, "dismissed");
    }
}

/// One operation recorded by `MemoryNotifier`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationEvent {
    Shown(NotificationHandle, String),
    Updated(NotificationHandle, String),
    Succeeded(NotificationHandle, String),
    Failed(NotificationHandle, String),
    Dismissed(NotificationHandle),
}

/// Sink that records operations in memory, for headless callers and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    next: AtomicU64,
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every operation recorded so far, oldest first.
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: NotificationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl NotificationSink for MemoryNotifier {
    fn show(&self, message: &str) -> NotificationHandle {
        let handle = NotificationHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.record(NotificationEvent::Shown(handle, message.to_string()));
        handle
    }

    fn update(&self, handle: NotificationHandle, message: &str) {
        self.record(NotificationEvent::Updated(handle, message.to_string()));
    }

    fn resolve_success(&self, handle: NotificationHandle, message: &str) {
        self.record(NotificationEvent::Succeeded(handle, message.to_string()));
    }

    fn resolve_failure(&self, handle: NotificationHandle, message: &str) {
        self.record(NotificationEvent::Failed(handle, message.to_string()));
    }

    fn dismiss(&self, handle: NotificationHandle) {
        self.record(NotificationEvent::Dismissed(handle));
    }
}
