//! In-process run registry.
//!
//! `InMemoryRuns` plays the part of the job platform: it hands out trigger
//! handles, accepts status changes and stream fragments from whoever drives
//! the run, and serves them back through the source contracts. Every run and
//! every `(run, channel)` pair is backed by a `watch` channel, so subscribers
//! always see the latest value first and then each change.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::errors::SourceError;
use crate::model::{AccessToken, RunId, RunSnapshot, RunStatus, TriggerHandle};
use crate::source::{FragmentStream, StatusSource, StatusStream, StreamSource, TokenFetcher};

type StatusCell = Option<Result<RunSnapshot<Value>, SourceError>>;

struct RunEntry {
    token: AccessToken,
    status: watch::Sender<StatusCell>,
}

#[derive(Default)]
struct Registry {
    runs: DashMap<RunId, RunEntry>,
    streams: DashMap<(RunId, String), watch::Sender<Vec<String>>>,
}

/// Shared in-memory implementation of `StatusSource`, `StreamSource` and
/// `TokenFetcher`. Clones share the same registry.
#[derive(Clone, Default)]
pub struct InMemoryRuns {
    inner: Arc<Registry>,
}

impl InMemoryRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new `PENDING` run with a fresh id and token.
    pub fn create_run(&self) -> TriggerHandle {
        let handle = TriggerHandle {
            run_id: RunId::new(format!("run_{}", Uuid::new_v4().simple())),
            public_access_token: AccessToken::new(format!("pat_{}", Uuid::new_v4().simple())),
        };
        self.register(handle.run_id.clone(), handle.public_access_token.clone());
        handle
    }

    /// Registers a run under a known id, replacing any previous entry.
    pub fn register(&self, run_id: RunId, token: AccessToken) {
        let initial = RunSnapshot::new(run_id.clone(), RunStatus::Pending);
        let (status, _) = watch::channel(Some(Ok(initial)));
        debug!(run_id = %run_id, "run registered");
        self.inner.runs.insert(run_id, RunEntry { token, status });
    }

    /// Publishes a new status (and optionally an output) for a run.
    pub fn set_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
        output: Option<Value>,
    ) -> Result<(), SourceError> {
        let entry = self.entry(run_id)?;
        let snapshot = RunSnapshot {
            id: run_id.clone(),
            status,
            output,
        };
        debug!(run_id = %run_id, %status, "run status changed");
        entry.status.send_replace(Some(Ok(snapshot)));
        Ok(())
    }

    /// Appends one fragment to a channel of a run.
    pub fn append(
        &self,
        run_id: &RunId,
        channel: &str,
        fragment: impl Into<String>,
    ) -> Result<(), SourceError> {
        self.entry(run_id)?;
        let fragment = fragment.into();
        self.with_channel(run_id, channel, |tx| {
            tx.send_modify(|fragments| fragments.push(fragment))
        });
        Ok(())
    }

    /// Pushes a subscription failure to every status subscriber of a run.
    pub fn break_subscription(&self, run_id: &RunId, error: SourceError) -> Result<(), SourceError> {
        let entry = self.entry(run_id)?;
        entry.status.send_replace(Some(Err(error)));
        Ok(())
    }

    /// Latest snapshot of a run, if it exists and is not in an error state.
    pub fn snapshot(&self, run_id: &RunId) -> Option<RunSnapshot<Value>> {
        let entry = self.inner.runs.get(run_id)?;
        let cell = entry.status.borrow().clone();
        cell.and_then(Result::ok)
    }

    /// Forgets a run. Open subscriptions to it end.
    pub fn remove(&self, run_id: &RunId) {
        self.inner.runs.remove(run_id);
        self.inner.streams.retain(|(id, _), _| id != run_id);
    }

    fn entry(
        &self,
        run_id: &RunId,
    ) -> Result<dashmap::mapref::one::Ref<'_, RunId, RunEntry>, SourceError> {
        self.inner.runs.get(run_id).ok_or_else(|| SourceError::NotFound {
            run_id: run_id.clone(),
        })
    }

    fn authorized(&self, run_id: &RunId, token: &AccessToken) -> Result<(), SourceError> {
        let entry = self.entry(run_id)?;
        if entry.token != *token {
            return Err(SourceError::Unauthorized {
                run_id: run_id.clone(),
            });
        }
        Ok(())
    }

    fn with_channel<R>(
        &self,
        run_id: &RunId,
        channel: &str,
        f: impl FnOnce(&watch::Sender<Vec<String>>) -> R,
    ) -> R {
        let tx = self
            .inner
            .streams
            .entry((run_id.clone(), channel.to_string()))
            .or_insert_with(|| watch::channel(Vec::new()).0);
        f(&tx)
    }
}

/// Current value first, then every change until the sender goes away.
fn watch_stream<V>(rx: watch::Receiver<V>) -> impl Stream<Item = V> + Send
where
    V: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
}

#[async_trait::async_trait]
impl StatusSource for InMemoryRuns {
    async fn subscribe_status(
        &self,
        run_id: &RunId,
        token: &AccessToken,
    ) -> Result<StatusStream, SourceError> {
        self.authorized(run_id, token)?;
        let rx = self.entry(run_id)?.status.subscribe();
        debug!(run_id = %run_id, "status subscription opened");
        Ok(Box::pin(
            watch_stream(rx).filter_map(futures::future::ready),
        ))
    }
}

#[async_trait::async_trait]
impl StreamSource for InMemoryRuns {
    async fn subscribe_stream(
        &self,
        run_id: &RunId,
        channel: &str,
        token: &AccessToken,
    ) -> Result<FragmentStream, SourceError> {
        self.authorized(run_id, token)?;
        let rx = self.with_channel(run_id, channel, watch::Sender::subscribe);
        debug!(run_id = %run_id, channel, "stream subscription opened");
        Ok(Box::pin(watch_stream(rx).map(Ok)))
    }
}

#[async_trait::async_trait]
impl TokenFetcher for InMemoryRuns {
    async fn fetch_token(&self, run_id: &RunId) -> Result<Option<AccessToken>, SourceError> {
        Ok(Some(self.entry(run_id)?.token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn status_subscription_sees_current_then_changes() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();
        let mut stream = runs
            .subscribe_status(&handle.run_id, &handle.public_access_token)
            .await
            .expect("subscribe");

        let first = stream.next().await.expect("item").expect("snapshot");
        assert_eq!(first.status, RunStatus::Pending);

        runs.set_status(&handle.run_id, RunStatus::Completed, Some(json!({"n": 1})))
            .expect("set");
        let next = stream.next().await.expect("item").expect("snapshot");
        assert_eq!(next.status, RunStatus::Completed);
        assert_eq!(next.output, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn subscriptions_check_run_and_token() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();

        let err = runs
            .subscribe_status(&handle.run_id, &AccessToken::new("pat_wrong"))
            .await
            .err()
            .expect("unauthorized");
        assert!(matches!(err, SourceError::Unauthorized { .. }));

        let err = runs
            .subscribe_stream(&RunId::new("run_missing"), "progress", &handle.public_access_token)
            .await
            .err()
            .expect("not found");
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stream_items_are_accumulated_lists() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();
        runs.append(&handle.run_id, "progress", "a").expect("append");

        let mut stream = runs
            .subscribe_stream(&handle.run_id, "progress", &handle.public_access_token)
            .await
            .expect("subscribe");
        assert_eq!(stream.next().await.expect("item").expect("list"), vec!["a"]);

        runs.append(&handle.run_id, "progress", "b").expect("append");
        runs.append(&handle.run_id, "other", "ignored").expect("append");
        assert_eq!(stream.next().await.expect("item").expect("list"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn broken_subscription_yields_error_item() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();
        let mut stream = runs
            .subscribe_status(&handle.run_id, &handle.public_access_token)
            .await
            .expect("subscribe");
        stream.next().await.expect("initial").expect("snapshot");

        runs.break_subscription(&handle.run_id, SourceError::transport("gone"))
            .expect("break");
        let item = stream.next().await.expect("item");
        assert_eq!(item, Err(SourceError::transport("gone")));
    }

    #[tokio::test]
    async fn removing_a_run_ends_its_streams() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();
        let mut stream = runs
            .subscribe_status(&handle.run_id, &handle.public_access_token)
            .await
            .expect("subscribe");
        stream.next().await.expect("initial").expect("snapshot");

        runs.remove(&handle.run_id);
        assert!(stream.next().await.is_none());
        assert!(runs.snapshot(&handle.run_id).is_none());
    }

    #[tokio::test]
    async fn token_fetcher_returns_registered_token() {
        let runs = InMemoryRuns::new();
        let handle = runs.create_run();
        let token = runs.fetch_token(&handle.run_id).await.expect("fetch");
        assert_eq!(token, Some(handle.public_access_token));
        assert!(runs.fetch_token(&RunId::new("run_x")).await.is_err());
    }
}
