use crate::model::{RunId, RunStatus};

/// Errors returned by status/stream sources and token fetchers before they
/// reach the tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The access token does not authorize observing this run.
    #[error("unauthorized to observe run {run_id}")]
    Unauthorized { run_id: RunId },
    /// The source does not know the run.
    #[error("run not found: {run_id}")]
    NotFound { run_id: RunId },
    /// Connection or subscription I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The source sent something that does not fit the contract.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl SourceError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the tracker to callers and `on_error` callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// The run reached a failed or cancelled terminal status.
    ///
    /// The underlying cause is not carried; only the status the run ended in.
    #[error("run {run_id} did not complete (status {status})")]
    RunFailed { run_id: RunId, status: RunStatus },
    /// The status subscription itself failed, independent of the run outcome.
    #[error("subscription error: {0}")]
    Subscription(SourceError),
    /// Invalid watcher or tracker configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The tracker session task is no longer running.
    #[error("tracker session closed")]
    Closed,
}

impl TrackerError {
    pub(crate) fn run_failed(run_id: RunId, status: RunStatus) -> Self {
        Self::RunFailed { run_id, status }
    }
}

impl From<SourceError> for TrackerError {
    fn from(value: SourceError) -> Self {
        TrackerError::Subscription(value)
    }
}
