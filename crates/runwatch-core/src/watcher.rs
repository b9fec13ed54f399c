use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::callbacks::{CallbackSlot, Callbacks};
use crate::config::TrackerConfig;
use crate::errors::TrackerError;
use crate::memory::InMemoryRuns;
use crate::notify::{LogNotifier, NotificationSink};
use crate::session::{SessionSources, TrackerHandle, spawn_session};
use crate::source::{StatusSource, StreamSource, TokenFetcher};
use crate::tracker::RunTracker;

pub(crate) struct WatcherInner {
    status: Arc<dyn StatusSource>,
    stream: Arc<dyn StreamSource>,
    tokens: Option<Arc<dyn TokenFetcher>>,
    notifier: Arc<dyn NotificationSink>,
    config: TrackerConfig,
}

/// Entry point for tracking runs.
///
/// Holds the sources, token fetcher and notification sink every tracker
/// session shares. Cheap to clone.
#[derive(Clone)]
pub struct Watcher {
    pub(crate) inner: Arc<WatcherInner>,
}

impl Watcher {
    pub fn builder() -> WatcherBuilder {
        WatcherBuilder::default()
    }

    /// Watcher over an in-process registry, notifying through `tracing`.
    pub fn in_memory(runs: &InMemoryRuns) -> Result<Self, TrackerError> {
        Self::builder()
            .source(runs.clone())
            .token_fetcher(Arc::new(runs.clone()))
            .build()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Spawns a tracker session. Must be called within a tokio runtime.
    ///
    /// The session starts idle; point it at a run with `TrackerHandle::track`
    /// or `TrackerHandle::set_run`.
    pub fn track<T>(&self, options: TrackOptions<T>) -> Result<TrackerHandle<T>, TrackerError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut config = self.inner.config.clone();
        if let Some(enabled) = options.notifications {
            config.notifications_enabled = enabled;
        }
        if let Some(channel) = options.channel {
            config.channel = channel;
        }
        config.validate()?;

        let sources = SessionSources {
            status: self.inner.status.clone(),
            stream: self.inner.stream.clone(),
            tokens: self.inner.tokens.clone(),
            channel: config.channel.clone(),
        };
        let mut tracker = RunTracker::new(
            config,
            self.inner.notifier.clone(),
            CallbackSlot::new(options.callbacks),
        );
        if sources.tokens.is_some() {
            tracker = tracker.with_token_fetcher();
        }
        Ok(spawn_session(tracker, sources))
    }
}

/// Per-tracker options.
pub struct TrackOptions<T> {
    callbacks: Callbacks<T>,
    notifications: Option<bool>,
    channel: Option<String>,
}

impl<T> Default for TrackOptions<T> {
    fn default() -> Self {
        Self {
            callbacks: Callbacks::default(),
            notifications: None,
            channel: None,
        }
    }
}

impl<T> TrackOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(mut self, callbacks: Callbacks<T>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Overrides the watcher's notification setting for this tracker.
    pub fn notifications(mut self, enabled: bool) -> Self {
        self.notifications = Some(enabled);
        self
    }

    /// Overrides the watcher's stream channel for this tracker.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Builder used to wire sources before creating a `Watcher`.
#[derive(Default)]
pub struct WatcherBuilder {
    status: Option<Arc<dyn StatusSource>>,
    stream: Option<Arc<dyn StreamSource>>,
    tokens: Option<Arc<dyn TokenFetcher>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    config: Option<TrackerConfig>,
}

impl WatcherBuilder {
    pub fn status_source(mut self, source: Arc<dyn StatusSource>) -> Self {
        self.status = Some(source);
        self
    }

    pub fn stream_source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.stream = Some(source);
        self
    }

    /// Uses one value as both status and stream source.
    pub fn source<S>(self, source: S) -> Self
    where
        S: StatusSource + StreamSource + 'static,
    {
        let source = Arc::new(source);
        self.status_source(source.clone()).stream_source(source)
    }

    /// Enables fetching tokens for runs tracked without one.
    pub fn token_fetcher(mut self, fetcher: Arc<dyn TokenFetcher>) -> Self {
        self.tokens = Some(fetcher);
        self
    }

    /// Defaults to `LogNotifier`.
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to `TrackerConfig::default()`.
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Watcher, TrackerError> {
        let status = self
            .status
            .ok_or_else(|| TrackerError::Config("a status source is required".into()))?;
        let stream = self
            .stream
            .ok_or_else(|| TrackerError::Config("a stream source is required".into()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(Watcher {
            inner: Arc::new(WatcherInner {
                status,
                stream,
                tokens: self.tokens,
                notifier: self
                    .notifier
                    .unwrap_or_else(|| Arc::new(LogNotifier::new())),
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunId, RunStatus};
    use crate::notify::{MemoryNotifier, NotificationEvent};
    use crate::testing::{Probe, wait_until};
    use serde_json::{Value, json};

    #[test]
    fn build_requires_sources() {
        let result = Watcher::builder().build();
        assert!(
            matches!(result, Err(TrackerError::Config(message)) if message.contains("status source"))
        );
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = Watcher::builder()
            .source(InMemoryRuns::new())
            .config(TrackerConfig::default().channel(""))
            .build();
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[tokio::test]
    async fn track_rejects_blank_channel_override() {
        let watcher = Watcher::in_memory(&InMemoryRuns::new()).expect("watcher");
        let result = watcher.track::<Value>(TrackOptions::new().channel(" "));
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[tokio::test]
    async fn per_tracker_overrides_apply() {
        let runs = InMemoryRuns::new();
        let notifier = Arc::new(MemoryNotifier::new());
        let watcher = Watcher::builder()
            .source(runs.clone())
            .notifier(notifier.clone())
            .build()
            .expect("watcher");
        let probe = Probe::default();
        let handle = watcher
            .track(
                TrackOptions::new()
                    .callbacks(probe.callbacks())
                    .notifications(false)
                    .channel("logs"),
            )
            .expect("track");

        let run = runs.create_run();
        runs.append(&run.run_id, "progress", "wrong channel").expect("append");
        runs.append(&run.run_id, "logs", "right channel").expect("append");
        handle.track(&run).expect("track");
        wait_until(&handle, |view| view.fragments == 1).await;

        runs.set_status(&run.run_id, RunStatus::Failed, None).expect("status");
        let view = handle.wait_terminal(&run.run_id).await.expect("terminal");

        assert!(view.is_failed);
        assert_eq!(probe.fragments(), vec!["right channel"]);
        assert_eq!(probe.errors().len(), 1);
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn in_memory_watcher_fetches_tokens() {
        let runs = InMemoryRuns::new();
        let notifier = Arc::new(MemoryNotifier::new());
        let watcher = Watcher::builder()
            .source(runs.clone())
            .token_fetcher(Arc::new(runs.clone()))
            .notifier(notifier.clone())
            .build()
            .expect("watcher");
        let handle = watcher.track::<Value>(TrackOptions::new()).expect("track");

        let run = runs.create_run();
        handle.set_run(Some(run.run_id.clone()), None).expect("set");
        wait_until(&handle, |view| view.status == Some(RunStatus::Pending)).await;
        runs.set_status(&run.run_id, RunStatus::Completed, Some(json!("ok"))).expect("status");
        let view = handle.wait_terminal(&run.run_id).await.expect("terminal");

        assert_eq!(view.output, Some(json!("ok")));
        assert!(matches!(notifier.events().first(), Some(NotificationEvent::Shown(..))));
        assert!(matches!(notifier.events().last(), Some(NotificationEvent::Succeeded(..))));
    }

    #[tokio::test]
    async fn unknown_run_without_fetcher_stays_idle() {
        let runs = InMemoryRuns::new();
        let watcher = Watcher::builder().source(runs).build().expect("watcher");
        let handle = watcher.track::<Value>(TrackOptions::new()).expect("track");
        handle.set_run(Some(RunId::new("run_1")), None).expect("set");
        wait_until(&handle, |view| view.run_id.is_some()).await;

        let view = handle.view();
        assert!(!view.is_loading);
        assert!(!view.is_fetching_token);
        assert_eq!(view.status, None);
    }
}
