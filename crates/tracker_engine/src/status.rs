use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracker_core::{JobId, SequenceClock, StatusReport};

use crate::settings::TrackerSettings;
use crate::types::classify;
use crate::wire::StatusBody;
use crate::{FailureKind, PollError};

/// Delivery point for status reports.
pub type ReportSink = Arc<dyn Fn(StatusReport) + Send + Sync>;

/// Request/response status transport. Stateless and safe to call repeatedly.
#[async_trait::async_trait]
pub trait PullSource: Send + Sync {
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, PollError>;
}

/// Subscribed status transport.
///
/// Implementations deliver reports until the subscription is dropped or the
/// channel closes; closure is delivered as a `channel-closed` report.
pub trait PushSource: Send + Sync {
    fn subscribe(&self, job_id: &JobId, sink: ReportSink) -> PushSubscription;
}

#[derive(Clone)]
pub enum StatusSource {
    Pull(Arc<dyn PullSource>),
    Push(Arc<dyn PushSource>),
}

impl fmt::Debug for StatusSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusSource::Pull(_) => f.write_str("StatusSource::Pull"),
            StatusSource::Push(_) => f.write_str("StatusSource::Push"),
        }
    }
}

/// Lets deliveries through until closed.
///
/// A delivery holds the gate for its whole duration, so once `close` returns
/// no delivery is running and none will start.
#[derive(Debug)]
pub struct ReportGate {
    open: Mutex<bool>,
}

impl ReportGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
        })
    }

    /// Runs `deliver` if the gate is open. Returns whether it ran.
    pub fn pass(&self, deliver: impl FnOnce()) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return false;
        }
        deliver();
        true
    }

    /// Must not be called from inside a delivery through the same gate.
    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Wraps `sink` so it only receives reports while the gate is open.
    pub fn guard(self: &Arc<Self>, sink: ReportSink) -> ReportSink {
        let gate = self.clone();
        Arc::new(move |report| {
            gate.pass(|| sink(report));
        })
    }
}

/// Handle to a live push subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct PushSubscription {
    token: CancellationToken,
    gate: Arc<ReportGate>,
    task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// Returns the handle plus the gated sink and token the transport task must use.
    pub fn new(sink: ReportSink) -> (Self, ReportSink, CancellationToken) {
        let token = CancellationToken::new();
        let gate = ReportGate::new();
        let gated = gate.guard(sink);
        let subscription = Self {
            token: token.clone(),
            gate,
            task: None,
        };
        (subscription, gated, token)
    }

    /// Ties the transport task's lifetime to this subscription.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Idempotent. No report is delivered after this returns.
    pub fn unsubscribe(&mut self) {
        self.gate.close();
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Pull source over the service's HTTP status endpoints.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    settings: TrackerSettings,
    client: reqwest::Client,
    clock: Arc<SequenceClock>,
}

impl HttpStatusSource {
    pub fn new(settings: TrackerSettings, clock: Arc<SequenceClock>) -> Result<Self, PollError> {
        let client = settings
            .http_client()
            .map_err(|err| PollError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            client,
            clock,
        })
    }
}

#[async_trait::async_trait]
impl PullSource for HttpStatusSource {
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, PollError> {
        // Stamped at issue time so a slow response orders before later requests.
        let sequence = self.clock.next();
        let url = self
            .settings
            .status_url(job_id)
            .map_err(|err| PollError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(poll_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response.bytes().await.map_err(poll_error)?;
        let parsed: StatusBody = serde_json::from_slice(&body)
            .map_err(|err| PollError::new(FailureKind::InvalidResponse, err.to_string()))?;
        parsed
            .into_report(sequence)
            .map_err(|message| PollError::new(FailureKind::InvalidResponse, message))
    }
}

fn poll_error(err: reqwest::Error) -> PollError {
    PollError::new(classify(&err), err.to_string())
}
