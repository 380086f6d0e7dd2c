use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracker_core::JobId;
use url::Url;

/// How the poll loop spaces its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStrategy {
    /// Fixed-rate ticker; a slow response delays the next tick instead of bunching ticks.
    #[default]
    Interval,
    /// Sleep a full interval after each request settles.
    RecursiveTimeout,
}

/// Which resource the pull source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusEndpoint {
    /// `GET /analysis/{id}`
    #[default]
    Analysis,
    /// `GET /analysis/{id}/status`, status only.
    AnalysisStatus,
    /// `GET /documents/{id}`
    Documents,
}

impl StatusEndpoint {
    fn segments(self, job_id: &JobId) -> Vec<&str> {
        match self {
            StatusEndpoint::Analysis => vec!["analysis", job_id.as_str()],
            StatusEndpoint::AnalysisStatus => vec!["analysis", job_id.as_str(), "status"],
            StatusEndpoint::Documents => vec!["documents", job_id.as_str()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusTransport {
    #[default]
    Poll,
    Push,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid base url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("base url cannot carry a path: {0}")]
    NotABase(String),
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub schedule: ScheduleStrategy,
    /// Consecutive poll failures that end the job as `polling-exhausted`.
    pub max_consecutive_failures: u32,
    pub status_endpoint: StatusEndpoint,
    pub transport: StatusTransport,
    /// Switch to polling when the push channel closes before a terminal report.
    pub fallback_to_poll: bool,
    pub max_job_duration: Option<Duration>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            schedule: ScheduleStrategy::Interval,
            max_consecutive_failures: 3,
            status_endpoint: StatusEndpoint::Analysis,
            transport: StatusTransport::Poll,
            fallback_to_poll: true,
            max_job_duration: None,
        }
    }
}

impl TrackerSettings {
    /// Resolves `segments` below the base url, percent-encoding each one.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, EndpointError> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| EndpointError::NotABase(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn status_url(&self, job_id: &JobId) -> Result<Url, EndpointError> {
        self.endpoint(&self.status_endpoint.segments(job_id))
    }

    /// `ws(s)://…/ws/analysis/status/{id}`, scheme derived from the base url.
    pub fn push_url(&self, job_id: &JobId) -> Result<Url, EndpointError> {
        let mut url = self.endpoint(&["ws", "analysis", "status", job_id.as_str()])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| EndpointError::NotABase(self.base_url.clone()))?;
        Ok(url)
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
    }
}
