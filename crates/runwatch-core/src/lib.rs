//! Client-side tracking of background job runs.
//!
//! A `Watcher` holds the status source, the stream source, an optional token
//! fetcher and a notification sink. Each call to `Watcher::track` spawns a
//! session that follows one run at a time: it delivers every progress
//! fragment exactly once and in order, reports each terminal transition once,
//! and keeps a progress notification in step with the run.
//!
//! # Tracking an in-memory run
//!
//! ```no_run
//! use runwatch_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), TrackerError> {
//! let runs = InMemoryRuns::new();
//! let watcher = Watcher::in_memory(&runs)?;
//!
//! let handle = watcher.track::<serde_json::Value>(TrackOptions::new().callbacks(
//!     Callbacks::new()
//!         .on_fragment(|text| println!("{text}"))
//!         .on_complete(|output| println!("done: {output:?}")),
//! ))?;
//!
//! let run = runs.create_run();
//! handle.track(&run)?;
//! runs.append(&run.run_id, "progress", "Hello, World!")?;
//! runs.set_status(&run.run_id, RunStatus::Completed, None)?;
//!
//! let view = handle.wait_terminal(&run.run_id).await?;
//! assert!(view.is_completed);
//! # Ok(())
//! # }
//! ```

/// Consumer callbacks and the shared slot sessions read them through.
pub mod callbacks;
/// Tracker configuration and environment overrides.
pub mod config;
/// Public error types.
pub mod errors;
/// In-process run registry implementing every source contract.
pub mod memory;
/// Run identity, status and snapshot types.
pub mod model;
/// Progress notification sinks.
pub mod notify;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Async session driving one tracker, and its handle.
pub mod session;
/// Status, stream and token source contracts.
pub mod source;
/// The run tracking state machine.
pub mod tracker;
/// Watcher entry point and builder.
pub mod watcher;

#[cfg(test)]
mod testing;

pub use callbacks::{CallbackSlot, Callbacks};
pub use config::TrackerConfig;
pub use errors::{SourceError, TrackerError};
pub use memory::InMemoryRuns;
pub use model::{AccessToken, CompletionKey, RunId, RunSnapshot, RunStatus, TriggerHandle};
pub use notify::{
    LogNotifier, MemoryNotifier, NotificationEvent, NotificationHandle, NotificationSink,
    NotificationText,
};
pub use observability::init_observability;
pub use session::TrackerHandle;
pub use source::{FragmentStream, StatusSource, StatusStream, StreamSource, TokenFetcher};
pub use tracker::{RunTracker, SubscriptionTarget, TrackerView};
pub use watcher::{TrackOptions, Watcher, WatcherBuilder};
