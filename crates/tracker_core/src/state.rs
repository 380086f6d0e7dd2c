use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier the remote service assigns to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Uploading,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Cancelled)
    }

    /// Position along the lifecycle graph. Terminal phases share the last rank,
    /// so no terminal phase is reachable from another.
    pub fn rank(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Submitting => 1,
            Phase::Uploading => 2,
            Phase::Queued => 3,
            Phase::Processing => 4,
            Phase::Completed | Phase::Failed | Phase::Cancelled => 5,
        }
    }

    /// Maps the remote service's status vocabulary onto a phase.
    pub fn from_remote(status: &str) -> Option<Phase> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "uploaded" => Some(Phase::Queued),
            "processing" | "in_progress" => Some(Phase::Processing),
            "completed" | "processed" => Some(Phase::Completed),
            "failed" | "error" => Some(Phase::Failed),
            "cancelled" | "canceled" => Some(Phase::Cancelled),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Submitting => "Submitting",
            Phase::Uploading => "Uploading",
            Phase::Queued => "Queued",
            Phase::Processing => "Processing",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
            Phase::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Machine-readable failure category carried by [`ErrorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A single status poll failed; the phase is unaffected.
    Transient,
    PollingExhausted,
    RemoteFailure,
    Transfer,
    Timeout,
    ChannelClosed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::PollingExhausted => "polling-exhausted",
            ErrorKind::RemoteFailure => "remote-failure",
            ErrorKind::Transfer => "transfer",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ChannelClosed => "channel-closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One observation of a job's status, ordered by `sequence`.
///
/// `phase` is `None` for reports that carry no phase observation: transient
/// poll failures and push-channel closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub sequence: u64,
    pub phase: Option<Phase>,
    pub progress_percent: Option<u8>,
    pub result: Option<Value>,
    pub error_info: Option<ErrorInfo>,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(sequence: u64, phase: Phase) -> Self {
        Self {
            sequence,
            phase: Some(phase),
            progress_percent: None,
            result: None,
            error_info: None,
            message: None,
        }
    }

    pub fn transient(sequence: u64, message: impl Into<String>) -> Self {
        Self::without_phase(sequence, ErrorInfo::new(ErrorKind::Transient, message))
    }

    pub fn channel_closed(sequence: u64, message: impl Into<String>) -> Self {
        Self::without_phase(sequence, ErrorInfo::new(ErrorKind::ChannelClosed, message))
    }

    pub fn polling_exhausted(sequence: u64, message: impl Into<String>) -> Self {
        Self::new(sequence, Phase::Failed)
            .with_error(ErrorInfo::new(ErrorKind::PollingExhausted, message))
    }

    fn without_phase(sequence: u64, error: ErrorInfo) -> Self {
        Self {
            sequence,
            phase: None,
            progress_percent: None,
            result: None,
            error_info: Some(error),
            message: None,
        }
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress_percent = Some(percent.min(100));
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error_info = Some(error);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_some_and(Phase::is_terminal)
    }

    pub fn is_channel_closed(&self) -> bool {
        self.phase.is_none()
            && self
                .error_info
                .as_ref()
                .is_some_and(|info| info.kind == ErrorKind::ChannelClosed)
    }
}

/// Immutable copy of a job's lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: Option<JobId>,
    pub phase: Phase,
    pub progress_percent: u8,
    pub status_sequence: u64,
    /// Processing progress reported by the remote service, unrelated to upload progress.
    pub remote_progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<Value>,
    /// Result-shaped payload seen on a non-terminal report. Informational only.
    pub preliminary_result: Option<Value>,
    pub error_info: Option<ErrorInfo>,
    pub transient_error: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            phase: Phase::Idle,
            progress_percent: 0,
            status_sequence: 0,
            remote_progress: None,
            message: None,
            result: None,
            preliminary_result: None,
            error_info: None,
            transient_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while a job occupies the tracker: submitted and not yet terminal.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle && !self.phase.is_terminal()
    }
}
