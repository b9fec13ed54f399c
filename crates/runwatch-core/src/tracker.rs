//! Run tracking state machine.
//!
//! `RunTracker` owns all per-session state. Every input (run switch, token
//! result, status snapshot, fragment list, subscription error) is stored and
//! then folded through `reconcile`, which is where fragments are delivered and
//! terminal transitions reported. Both happen at most once: fragments are
//! diffed against a consumed count, and terminal transitions are keyed by
//! `(run_id, status)`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::callbacks::CallbackSlot;
use crate::config::TrackerConfig;
use crate::errors::{SourceError, TrackerError};
use crate::model::{AccessToken, CompletionKey, RunId, RunSnapshot, RunStatus};
use crate::notify::{NotificationHandle, NotificationSink};

/// What the session should currently be subscribed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub run_id: RunId,
    pub token: AccessToken,
    /// Whether the fragment channel is needed at all.
    pub stream: bool,
}

/// Observable tracker state, recomputed after every input.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerView<T> {
    pub run_id: Option<RunId>,
    pub status: Option<RunStatus>,
    pub is_loading: bool,
    pub is_completed: bool,
    pub is_failed: bool,
    pub is_cancelled: bool,
    pub is_fetching_token: bool,
    /// Run output, only once the run completed.
    pub output: Option<T>,
    /// Out-of-band subscription error, if the status source failed.
    pub error: Option<TrackerError>,
    /// Number of fragments delivered for the current run.
    pub fragments: usize,
}

impl<T> Default for TrackerView<T> {
    fn default() -> Self {
        Self {
            run_id: None,
            status: None,
            is_loading: false,
            is_completed: false,
            is_failed: false,
            is_cancelled: false,
            is_fetching_token: false,
            output: None,
            error: None,
            fragments: 0,
        }
    }
}

impl<T> TrackerView<T> {
    /// True once the run reached a terminal status or the subscription failed.
    pub fn is_settled(&self) -> bool {
        self.status.is_some_and(RunStatus::is_terminal) || self.error.is_some()
    }
}

#[derive(Debug, Default)]
struct TokenState {
    fetched: Option<AccessToken>,
    attempted_for: Option<RunId>,
    fetching: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    consumed_fragments: usize,
    handled_completion: Option<CompletionKey>,
    notification: Option<NotificationHandle>,
    notification_opened: bool,
}

/// Tracks one run at a time and reports its progress and outcome.
pub struct RunTracker<T> {
    config: TrackerConfig,
    notifier: Arc<dyn NotificationSink>,
    callbacks: CallbackSlot<T>,
    can_fetch_token: bool,
    run_id: Option<RunId>,
    explicit_token: Option<AccessToken>,
    token: TokenState,
    state: TrackerState,
    snapshot: Option<RunSnapshot<T>>,
    fragments: Vec<String>,
    subscription_error: Option<TrackerError>,
}

impl<T: Clone> RunTracker<T> {
    pub fn new(
        config: TrackerConfig,
        notifier: Arc<dyn NotificationSink>,
        callbacks: CallbackSlot<T>,
    ) -> Self {
        Self {
            config,
            notifier,
            callbacks,
            can_fetch_token: false,
            run_id: None,
            explicit_token: None,
            token: TokenState::default(),
            state: TrackerState::default(),
            snapshot: None,
            fragments: Vec::new(),
            subscription_error: None,
        }
    }

    /// Allows `take_token_request` to ask for tokens the caller did not supply.
    pub fn with_token_fetcher(mut self) -> Self {
        self.can_fetch_token = true;
        self
    }

    pub fn callbacks(&self) -> &CallbackSlot<T> {
        &self.callbacks
    }

    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// The explicit token if one was given, else the fetched one.
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.explicit_token.as_ref().or(self.token.fetched.as_ref())
    }

    /// Tracking is active once there is a run and a token to watch it with.
    pub fn is_active(&self) -> bool {
        self.run_id.is_some() && self.access_token().is_some()
    }

    /// Points the tracker at a run (or at nothing).
    ///
    /// Switching to a different run id discards all state of the previous run
    /// and dismisses its notification unresolved.
    pub fn set_run(
        &mut self,
        run_id: Option<RunId>,
        access_token: Option<AccessToken>,
    ) -> TrackerView<T> {
        if run_id != self.run_id {
            self.switch_run(run_id);
        }
        self.explicit_token = access_token;
        self.reconcile()
    }

    /// Returns the run id to fetch a token for, at most once per run id.
    ///
    /// A returned request marks the fetch as started; report its result with
    /// `finish_token_fetch`.
    pub fn take_token_request(&mut self) -> Option<RunId> {
        let run_id = self.run_id.as_ref()?;
        if !self.can_fetch_token
            || self.explicit_token.is_some()
            || self.token.attempted_for.as_ref() == Some(run_id)
        {
            return None;
        }
        self.token.attempted_for = Some(run_id.clone());
        self.token.fetching = true;
        debug!(run_id = %run_id, "fetching access token");
        Some(run_id.clone())
    }

    /// Applies the result of a token fetch started for `run_id`.
    ///
    /// Results for a run that is no longer tracked are dropped.
    pub fn finish_token_fetch(
        &mut self,
        run_id: &RunId,
        result: Result<Option<AccessToken>, SourceError>,
    ) -> TrackerView<T> {
        if self.run_id.as_ref() != Some(run_id) {
            debug!(run_id = %run_id, "dropping token for a run no longer tracked");
            return self.view();
        }
        self.token.fetching = false;
        match result {
            Ok(Some(token)) => self.token.fetched = Some(token),
            Ok(None) => debug!(run_id = %run_id, "token fetcher returned no token"),
            Err(err) => warn!(run_id = %run_id, error = %err, "failed to fetch access token"),
        }
        self.reconcile()
    }

    /// The subscriptions the current state calls for, if any.
    pub fn subscription_target(&self) -> Option<SubscriptionTarget> {
        let run_id = self.run_id.clone()?;
        let token = self.access_token()?.clone();
        Some(SubscriptionTarget {
            run_id,
            token,
            stream: self.config.notifications_enabled || self.callbacks.wants_fragments(),
        })
    }

    /// Records the latest status snapshot. Snapshots for other runs are ignored.
    pub fn observe_status(&mut self, snapshot: RunSnapshot<T>) -> TrackerView<T> {
        if self.run_id.as_ref() != Some(&snapshot.id) {
            debug!(snapshot_run = %snapshot.id, "ignoring snapshot for another run");
            return self.view();
        }
        self.snapshot = Some(snapshot);
        self.reconcile()
    }

    /// Records the latest accumulated fragment list of the stream channel.
    pub fn observe_fragments(&mut self, fragments: Vec<String>) -> TrackerView<T> {
        if self.run_id.is_none() {
            return self.view();
        }
        if fragments.len() >= self.fragments.len() {
            self.fragments = fragments;
        }
        self.reconcile()
    }

    /// Reports a failure of the status subscription itself.
    ///
    /// This is not a run outcome, so no completion key is recorded.
    pub fn observe_error(&mut self, error: SourceError) -> TrackerView<T> {
        let Some(run_id) = self.run_id.as_ref() else {
            return self.view();
        };
        warn!(run_id = %run_id, error = %error, "status subscription failed");
        let error = TrackerError::Subscription(error);
        if let Some(handle) = self.state.notification.take() {
            let message = self.callbacks.text().error(&error);
            self.notifier.resolve_failure(handle, &message);
        }
        self.subscription_error = Some(error.clone());
        self.callbacks.error(&error);
        self.view()
    }

    /// Folds the stored inputs into side effects and returns the new view.
    pub fn reconcile(&mut self) -> TrackerView<T> {
        self.open_notification();
        self.deliver_fragments();
        self.handle_terminal();
        self.view()
    }

    pub fn view(&self) -> TrackerView<T> {
        let status = self.snapshot.as_ref().map(|snapshot| snapshot.status);
        let terminal = status.is_some_and(RunStatus::is_terminal);
        let is_completed = status == Some(RunStatus::Completed);
        TrackerView {
            run_id: self.run_id.clone(),
            status,
            is_loading: self.token.fetching
                || (self.is_active() && self.subscription_error.is_none() && !terminal),
            is_completed,
            is_failed: status.is_some_and(RunStatus::is_failure),
            is_cancelled: status == Some(RunStatus::Cancelled),
            is_fetching_token: self.token.fetching,
            output: if is_completed {
                self.snapshot.as_ref().and_then(|s| s.output.clone())
            } else {
                None
            },
            error: self.subscription_error.clone(),
            fragments: self.state.consumed_fragments,
        }
    }

    /// Stops tracking; same as switching to no run.
    pub fn detach(&mut self) -> TrackerView<T> {
        self.set_run(None, None)
    }

    fn switch_run(&mut self, run_id: Option<RunId>) {
        debug!(from = ?self.run_id, to = ?run_id, "switching tracked run");
        if let Some(handle) = self.state.notification.take() {
            self.notifier.dismiss(handle);
        }
        self.state = TrackerState::default();
        self.token = TokenState::default();
        self.snapshot = None;
        self.fragments.clear();
        self.subscription_error = None;
        self.run_id = run_id;
    }

    fn open_notification(&mut self) {
        if !self.config.notifications_enabled || self.state.notification_opened || !self.is_active() {
            return;
        }
        self.state.notification_opened = true;
        let message = self
            .callbacks
            .text()
            .progress("")
            .unwrap_or_else(|| self.config.loading_message.clone());
        self.state.notification = Some(self.notifier.show(&message));
    }

    fn deliver_fragments(&mut self) {
        let start = self.state.consumed_fragments;
        if self.fragments.len() <= start {
            return;
        }
        self.state.consumed_fragments = self.fragments.len();
        debug!(
            run_id = ?self.run_id,
            new = self.fragments.len() - start,
            total = self.fragments.len(),
            "stream fragments"
        );
        for fragment in &self.fragments[start..] {
            self.callbacks.fragment(fragment);
        }

        if let Some(handle) = self.state.notification {
            let message = self
                .callbacks
                .text()
                .progress(&self.fragments.join("\n"))
                .or_else(|| self.fragments.last().cloned())
                .unwrap_or_else(|| self.config.loading_message.clone());
            self.notifier.update(handle, &message);
        }
    }

    fn handle_terminal(&mut self) {
        let (Some(run_id), Some(snapshot)) = (self.run_id.as_ref(), self.snapshot.as_ref()) else {
            return;
        };
        if snapshot.id != *run_id || !snapshot.status.is_terminal() {
            return;
        }
        let key = CompletionKey::new(run_id.clone(), snapshot.status);
        if self.state.handled_completion.as_ref() == Some(&key) {
            return;
        }
        // Marked before any callback runs.
        self.state.handled_completion = Some(key);

        let status = snapshot.status;
        let text = self.callbacks.text();
        if status == RunStatus::Completed {
            info!(run_id = %run_id, "run completed");
            if let Some(handle) = self.state.notification.take() {
                self.notifier
                    .resolve_success(handle, &text.success(&self.config.success_message));
            }
            self.callbacks.complete(snapshot.output.as_ref());
        } else {
            info!(run_id = %run_id, %status, "run did not complete");
            let error = TrackerError::run_failed(run_id.clone(), status);
            if let Some(handle) = self.state.notification.take() {
                self.notifier.resolve_failure(handle, &text.error(&error));
            }
            self.callbacks.error(&error);
        }
    }
}

impl<T> Drop for RunTracker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.state.notification.take() {
            self.notifier.dismiss(handle);
        }
    }
}
