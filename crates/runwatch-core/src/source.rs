//! Contracts for the external collaborators a tracker consumes.
//!
//! Sources push snapshots; the tracker only ever reads the latest one.

use std::pin::Pin;

use crate::errors::SourceError;
use crate::model::{AccessToken, RunId, RunSnapshot};

/// Status snapshots of one run, newest last. An `Err` item is an
/// out-of-band subscription failure, not a run outcome.
pub type StatusStream = Pin<
    Box<dyn futures::Stream<Item = Result<RunSnapshot<serde_json::Value>, SourceError>> + Send>,
>;

/// Accumulated fragment lists of one channel. Each item is the full list so
/// far; lists only grow.
pub type FragmentStream =
    Pin<Box<dyn futures::Stream<Item = Result<Vec<String>, SourceError>> + Send>>;

/// Pushes status snapshots for a run.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn subscribe_status(
        &self,
        run_id: &RunId,
        token: &AccessToken,
    ) -> Result<StatusStream, SourceError>;
}

/// Pushes the accumulated fragments of a named channel of a run.
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync {
    async fn subscribe_stream(
        &self,
        run_id: &RunId,
        channel: &str,
        token: &AccessToken,
    ) -> Result<FragmentStream, SourceError>;
}

/// Obtains an access token for a run when the caller did not supply one.
///
/// `Ok(None)` means no token is available yet; it is not an error.
#[async_trait::async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch_token(&self, run_id: &RunId) -> Result<Option<AccessToken>, SourceError>;
}
