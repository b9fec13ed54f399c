use crate::errors::TrackerError;

/// Name of the stream channel tasks append progress fragments to.
pub const DEFAULT_CHANNEL: &str = "progress";
pub const DEFAULT_LOADING_MESSAGE: &str = "Loading...";
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Sync completed successfully";

/// Tracker behavior shared by every session a `Watcher` spawns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Stream channel to subscribe to for progress fragments.
    pub channel: String,
    /// Whether progress notifications are shown.
    pub notifications_enabled: bool,
    /// Notification text used before any fragment arrives.
    pub loading_message: String,
    /// Notification text used when a run completes, unless overridden per tracker.
    pub success_message: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            notifications_enabled: true,
            loading_message: DEFAULT_LOADING_MESSAGE.to_string(),
            success_message: DEFAULT_SUCCESS_MESSAGE.to_string(),
        }
    }
}

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

impl TrackerConfig {
    /// Builds a config from the defaults overridden by environment variables.
    ///
    /// - `RUNWATCH_CHANNEL`: stream channel name.
    /// - `RUNWATCH_NOTIFICATIONS`: enable/disable flag (`true`, `off`, `0`, ...).
    /// - `RUNWATCH_LOADING_MESSAGE` / `RUNWATCH_SUCCESS_MESSAGE`: notification text.
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TrackerError> {
        let mut config = Self::default();
        if let Some(channel) = lookup("RUNWATCH_CHANNEL") {
            config.channel = channel;
        }
        if let Some(raw) = lookup("RUNWATCH_NOTIFICATIONS") {
            config.notifications_enabled = parse_bool_env(&raw).ok_or_else(|| {
                TrackerError::Config(format!("invalid RUNWATCH_NOTIFICATIONS value: {raw}"))
            })?;
        }
        if let Some(message) = lookup("RUNWATCH_LOADING_MESSAGE") {
            config.loading_message = message;
        }
        if let Some(message) = lookup("RUNWATCH_SUCCESS_MESSAGE") {
            config.success_message = message;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the stream channel name.
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Enables or disables progress notifications.
    pub fn notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn loading_message(mut self, message: impl Into<String>) -> Self {
        self.loading_message = message.into();
        self
    }

    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = message.into();
        self
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.channel.trim().is_empty() {
            return Err(TrackerError::Config("channel must not be empty".into()));
        }
        Ok(())
    }
}
