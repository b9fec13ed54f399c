//! Common imports for typical tracker usage.
pub use crate::{
    AccessToken, Callbacks, InMemoryRuns, NotificationText, RunId, RunSnapshot, RunStatus,
    TrackOptions, TrackerConfig, TrackerError, TrackerHandle, TrackerView, TriggerHandle,
    Watcher,
};
