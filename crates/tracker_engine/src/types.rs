use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tracker_core::{JobId, Phase};

/// Input handed to the remote evaluation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Binary document sent as a multipart upload.
    Document { file_name: String, bytes: Bytes },
    /// Free-form pitch text.
    Pitch(String),
    /// Address of a page describing the venture.
    Url(String),
}

impl Payload {
    pub fn document(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Payload::Document {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Short description for log lines; never includes the payload body.
    pub fn describe(&self) -> String {
        match self {
            Payload::Document { file_name, bytes } => {
                format!("document {file_name} ({} bytes)", bytes.len())
            }
            Payload::Pitch(text) => format!("pitch ({} chars)", text.chars().count()),
            Payload::Url(url) => format!("url {url}"),
        }
    }
}

/// What the remote service returns for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub job_id: JobId,
    /// Status reported alongside the id, when the service recognised it.
    pub initial_status: Option<Phase>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    InvalidResponse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Submission failed. Never retried by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransferError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// HTTP status of the rejecting response, if the failure got that far.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }
}

/// A single status poll failed. Counted toward the consecutive-failure limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PollError {
    pub kind: FailureKind,
    pub message: String,
}

impl PollError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A non-terminal job is already tracked; cancel it first.
    #[error("a job is already active in phase {phase}")]
    AlreadyActive { phase: Phase },
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("job was cancelled before the transfer settled")]
    Cancelled,
    #[error("job exceeded its maximum duration")]
    TimedOut,
    #[error("controller has been disposed")]
    Disposed,
}

pub(crate) fn classify(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    }
}
