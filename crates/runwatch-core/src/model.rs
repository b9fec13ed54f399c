use std::fmt;

/// Opaque identifier of one run of a background job.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the run id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Short-lived credential authorizing real-time observation of one run.
///
/// `Debug` never prints the secret.
#[derive(Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

impl From<&str> for AccessToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// What triggering a task returns: the run to watch and a token to watch it with.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHandle {
    pub run_id: RunId,
    pub public_access_token: AccessToken,
}

/// Status of a run as reported by the status source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Queued,
    Delayed,
    Executing,
    Reattempting,
    Frozen,
    Completed,
    Failed,
    Crashed,
    #[serde(alias = "CANCELED")]
    Cancelled,
    SystemFailure,
    TimedOut,
    Expired,
    /// Any status this crate does not know about. Treated as non-terminal.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// No further transitions happen from a terminal status.
    pub fn is_terminal(self) -> bool {
        self == Self::Completed || self == Self::Cancelled || self.is_failure()
    }

    /// Terminal statuses that count as a failed run (cancellation does not).
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Crashed | Self::SystemFailure | Self::TimedOut | Self::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Delayed => "DELAYED",
            Self::Executing => "EXECUTING",
            Self::Reattempting => "REATTEMPTING",
            Self::Frozen => "FROZEN",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Crashed => "CRASHED",
            Self::Cancelled => "CANCELLED",
            Self::SystemFailure => "SYSTEM_FAILURE",
            Self::TimedOut => "TIMED_OUT",
            Self::Expired => "EXPIRED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known state of a run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunSnapshot<T> {
    pub id: RunId,
    pub status: RunStatus,
    pub output: Option<T>,
}

impl<T> RunSnapshot<T> {
    pub fn new(id: impl Into<RunId>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            output: None,
        }
    }

    pub fn with_output(mut self, output: T) -> Self {
        self.output = Some(output);
        self
    }
}

impl RunSnapshot<serde_json::Value> {
    /// Decodes the untyped output into `T`. A JSON `null` output decodes to `None`.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<RunSnapshot<T>, serde_json::Error> {
        let output = match self.output {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(serde_json::from_value(value)?),
        };
        Ok(RunSnapshot {
            id: self.id,
            status: self.status,
            output,
        })
    }
}

/// Identifies one terminal transition that has already been reported.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompletionKey {
    pub run_id: RunId,
    pub status: RunStatus,
}

impl CompletionKey {
    pub fn new(run_id: RunId, status: RunStatus) -> Self {
        Self { run_id, status }
    }
}

impl fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.run_id, self.status)
    }
}
