//! Async driver for one `RunTracker`.
//!
//! A session is a single spawned task that owns the tracker, the open
//! subscriptions and the pending token fetch. Commands from `TrackerHandle`,
//! status items, fragment lists and token results are all serialised through
//! one `select!` loop; after each event the session re-derives what it should
//! be subscribed to and publishes the tracker view.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::callbacks::{CallbackSlot, Callbacks};
use crate::errors::{SourceError, TrackerError};
use crate::model::{AccessToken, RunId, TriggerHandle};
use crate::source::{FragmentStream, StatusSource, StatusStream, StreamSource, TokenFetcher};
use crate::tracker::{RunTracker, SubscriptionTarget, TrackerView};

/// Collaborators a session subscribes through.
#[derive(Clone)]
pub(crate) struct SessionSources {
    pub status: Arc<dyn StatusSource>,
    pub stream: Arc<dyn StreamSource>,
    pub tokens: Option<Arc<dyn TokenFetcher>>,
    pub channel: String,
}

enum Command {
    SetRun {
        run_id: Option<RunId>,
        token: Option<AccessToken>,
    },
    Refresh,
    Shutdown,
}

type TokenResult = (RunId, Result<Option<AccessToken>, SourceError>);

/// Handle to a running tracker session.
///
/// Dropping every clone of the handle stops the session and dismisses any
/// open notification.
pub struct TrackerHandle<T> {
    commands: mpsc::UnboundedSender<Command>,
    views: watch::Receiver<TrackerView<T>>,
    callbacks: CallbackSlot<T>,
}

impl<T> Clone for TrackerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            views: self.views.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<T: Clone> TrackerHandle<T> {
    /// Points the session at a run. A missing token is fetched if the watcher
    /// has a token fetcher.
    pub fn set_run(
        &self,
        run_id: Option<RunId>,
        token: Option<AccessToken>,
    ) -> Result<(), TrackerError> {
        self.send(Command::SetRun { run_id, token })
    }

    /// Starts tracking the run a trigger call returned.
    pub fn track(&self, handle: &TriggerHandle) -> Result<(), TrackerError> {
        self.set_run(
            Some(handle.run_id.clone()),
            Some(handle.public_access_token.clone()),
        )
    }

    /// Stops tracking without ending the session.
    pub fn clear(&self) -> Result<(), TrackerError> {
        self.set_run(None, None)
    }

    /// Swaps the callbacks. Progress already made on the current run is kept.
    pub fn set_callbacks(&self, callbacks: Callbacks<T>) -> Result<(), TrackerError> {
        self.callbacks.replace(callbacks);
        self.send(Command::Refresh)
    }

    /// Latest published view.
    pub fn view(&self) -> TrackerView<T> {
        self.views.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TrackerView<T>> {
        self.views.clone()
    }

    /// Waits until the view for `run_id` is settled (terminal status or
    /// subscription error).
    ///
    /// Never resolves for a run that cannot become active, e.g. one whose
    /// token could not be obtained; wrap in a timeout where that matters.
    pub async fn wait_terminal(&self, run_id: &RunId) -> Result<TrackerView<T>, TrackerError> {
        let mut views = self.views.clone();
        let view = views
            .wait_for(|view| view.run_id.as_ref() == Some(run_id) && view.is_settled())
            .await
            .map_err(|_| TrackerError::Closed)?
            .clone();
        Ok(view)
    }

    /// Stops the session. Pending commands sent before this are still applied.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands.send(command).map_err(|_| TrackerError::Closed)
    }
}

/// Spawns the session task on the current tokio runtime.
pub(crate) fn spawn_session<T>(tracker: RunTracker<T>, sources: SessionSources) -> TrackerHandle<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (views_tx, views_rx) = watch::channel(tracker.view());
    let callbacks = tracker.callbacks().clone();
    tokio::spawn(session_task(tracker, sources, commands_rx, views_tx));
    TrackerHandle {
        commands: commands_tx,
        views: views_rx,
        callbacks,
    }
}

#[derive(Default)]
struct Subscriptions {
    target: Option<SubscriptionTarget>,
    status: Option<StatusStream>,
    fragments: Option<FragmentStream>,
}

async fn session_task<T>(
    mut tracker: RunTracker<T>,
    sources: SessionSources,
    mut commands: mpsc::UnboundedReceiver<Command>,
    views: watch::Sender<TrackerView<T>>,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let (token_tx, mut token_rx) = mpsc::unbounded_channel::<TokenResult>();
    let mut subs = Subscriptions::default();

    loop {
        sync(&mut tracker, &sources, &mut subs, &token_tx).await;
        views.send_replace(tracker.view());

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::SetRun { run_id, token }) => {
                    tracker.set_run(run_id, token);
                }
                Some(Command::Refresh) => {
                    tracker.reconcile();
                }
                Some(Command::Shutdown) | None => break,
            },
            Some((run_id, result)) = token_rx.recv() => {
                tracker.finish_token_fetch(&run_id, result);
            }
            item = next_item(&mut subs.status) => match item {
                Some(Ok(raw)) => {
                    let run_id = raw.id.clone();
                    match raw.decode::<T>() {
                        Ok(snapshot) => {
                            tracker.observe_status(snapshot);
                        }
                        Err(err) => warn!(run_id = %run_id, error = %err, "skipping snapshot with undecodable output"),
                    }
                }
                Some(Err(err)) => {
                    tracker.observe_error(err);
                }
                None => {
                    debug!(run_id = ?tracker.run_id(), "status stream ended");
                    subs.status = None;
                }
            },
            item = next_item(&mut subs.fragments) => match item {
                Some(Ok(fragments)) => {
                    tracker.observe_fragments(fragments);
                }
                Some(Err(err)) => {
                    warn!(run_id = ?tracker.run_id(), error = %err, "fragment stream failed");
                    subs.fragments = None;
                }
                None => {
                    debug!(run_id = ?tracker.run_id(), "fragment stream ended");
                    subs.fragments = None;
                }
            },
        }
    }

    tracker.detach();
    views.send_replace(tracker.view());
    debug!("tracker session stopped");
}

/// Starts a pending token fetch and (re)opens subscriptions when the tracker's
/// target changed.
async fn sync<T: Clone>(
    tracker: &mut RunTracker<T>,
    sources: &SessionSources,
    subs: &mut Subscriptions,
    token_tx: &mpsc::UnboundedSender<TokenResult>,
) {
    if let Some(run_id) = tracker.take_token_request() {
        match sources.tokens.clone() {
            Some(fetcher) => {
                let tx = token_tx.clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch_token(&run_id).await;
                    let _ = tx.send((run_id, result));
                });
            }
            None => {
                tracker.finish_token_fetch(&run_id, Ok(None));
            }
        }
    }

    let target = tracker.subscription_target();
    if target == subs.target {
        return;
    }
    subs.status = None;
    subs.fragments = None;
    subs.target = target.clone();
    let Some(target) = target else {
        return;
    };

    match sources
        .status
        .subscribe_status(&target.run_id, &target.token)
        .await
    {
        Ok(stream) => subs.status = Some(stream),
        Err(err) => {
            tracker.observe_error(err);
        }
    }

    if target.stream {
        match sources
            .stream
            .subscribe_stream(&target.run_id, &sources.channel, &target.token)
            .await
        {
            Ok(stream) => subs.fragments = Some(stream),
            Err(err) => {
                warn!(run_id = %target.run_id, channel = %sources.channel, error = %err, "fragment subscription failed")
            }
        }
    }
    debug!(run_id = %target.run_id, stream = target.stream, "subscriptions opened");
}

/// Next item of an optional stream; pending forever when there is none.
async fn next_item<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
