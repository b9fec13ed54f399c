use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::callbacks::Callbacks;
use crate::errors::{SourceError, TrackerError};
use crate::memory::InMemoryRuns;
use crate::model::{AccessToken, RunId};
use crate::session::TrackerHandle;
use crate::source::TokenFetcher;
use crate::tracker::TrackerView;

/// Records every callback invocation.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    completed: Arc<Mutex<Vec<Option<Value>>>>,
    errors: Arc<Mutex<Vec<TrackerError>>>,
    fragments: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub(crate) fn callbacks(&self) -> Callbacks<Value> {
        let completed = self.completed.clone();
        let errors = self.errors.clone();
        let fragments = self.fragments.clone();
        Callbacks::new()
            .on_complete(move |output| completed.lock().unwrap().push(output.cloned()))
            .on_error(move |err| errors.lock().unwrap().push(err.clone()))
            .on_fragment(move |text| fragments.lock().unwrap().push(text.to_string()))
    }

    pub(crate) fn completed(&self) -> Vec<Option<Value>> {
        self.completed.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<TrackerError> {
        self.errors.lock().unwrap().clone()
    }

    pub(crate) fn fragments(&self) -> Vec<String> {
        self.fragments.lock().unwrap().clone()
    }
}

/// Token fetcher backed by `InMemoryRuns` that counts its calls.
pub(crate) struct CountingFetcher {
    runs: InMemoryRuns,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub(crate) fn new(runs: InMemoryRuns) -> Self {
        Self {
            runs,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenFetcher for CountingFetcher {
    async fn fetch_token(&self, run_id: &RunId) -> Result<Option<AccessToken>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.runs.fetch_token(run_id).await
    }
}

/// Waits (bounded) until the published view satisfies `predicate`.
pub(crate) async fn wait_until<T: Clone>(
    handle: &TrackerHandle<T>,
    predicate: impl FnMut(&TrackerView<T>) -> bool,
) {
    let mut views = handle.subscribe_view();
    tokio::time::timeout(Duration::from_secs(5), views.wait_for(predicate))
        .await
        .expect("timed out waiting for view")
        .expect("session closed");
}
