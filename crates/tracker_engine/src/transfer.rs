use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracker_core::JobId;
use tracker_logging::{tracker_debug, tracker_info};

use crate::settings::TrackerSettings;
use crate::types::classify;
use crate::wire::{EvaluateRequest, SubmitResponse};
use crate::{FailureKind, Payload, TransferError, TransferReceipt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Receives upload progress as integer percents.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn emit(&self, percent: u8) {
        self(percent)
    }
}

/// Forwards only values above the last one forwarded.
struct MonotonicProgress {
    inner: Arc<dyn ProgressSink>,
    last: Mutex<Option<u8>>,
}

impl MonotonicProgress {
    fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl ProgressSink for MonotonicProgress {
    fn emit(&self, percent: u8) {
        let percent = percent.min(100);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|previous| percent <= previous) {
            return;
        }
        *last = Some(percent);
        self.inner.emit(percent);
    }
}

/// Performs one submission per call and keeps no state once it settles.
#[async_trait::async_trait]
pub trait TransferChannel: Send + Sync {
    async fn upload(
        &self,
        payload: Payload,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TransferReceipt, TransferError>;

    /// Asks the remote service to stop work on `job_id`. Best effort.
    async fn cancel_remote(&self, job_id: &JobId) -> Result<(), TransferError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransfer {
    settings: TrackerSettings,
    client: reqwest::Client,
}

impl ReqwestTransfer {
    pub fn new(settings: TrackerSettings) -> Result<Self, TransferError> {
        let client = settings
            .http_client()
            .map_err(|err| TransferError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, TransferError> {
        self.settings
            .endpoint(segments)
            .map_err(|err| TransferError::new(FailureKind::InvalidUrl, err.to_string()))
    }

    async fn send_document(
        &self,
        file_name: String,
        bytes: Bytes,
        progress: Arc<MonotonicProgress>,
    ) -> Result<reqwest::Response, TransferError> {
        let url = self.url(&["upload"])?;
        let length = bytes.len() as u64;
        let part = Part::stream_with_length(progress_body(bytes, progress), length)
            .file_name(file_name);
        let form = Form::new().part("file", part);
        self.client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transfer_error)
    }

    async fn send_evaluation(
        &self,
        request: EvaluateRequest<'_>,
    ) -> Result<reqwest::Response, TransferError> {
        let url = self.url(&["analysis", "evaluate"])?;
        self.client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(transfer_error)
    }
}

#[async_trait::async_trait]
impl TransferChannel for ReqwestTransfer {
    async fn upload(
        &self,
        payload: Payload,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TransferReceipt, TransferError> {
        tracker_debug!("sending {}", payload.describe());
        let progress = Arc::new(MonotonicProgress::new(progress));
        progress.emit(0);

        let response = match payload {
            Payload::Document { file_name, bytes } => {
                self.send_document(file_name, bytes, progress.clone())
                    .await?
            }
            Payload::Pitch(text) => {
                self.send_evaluation(EvaluateRequest {
                    pitch: &text,
                    website_url: None,
                })
                .await?
            }
            Payload::Url(url) => {
                self.send_evaluation(EvaluateRequest {
                    pitch: &url,
                    website_url: Some(&url),
                })
                .await?
            }
        };

        let receipt = read_receipt(response).await?;
        progress.emit(100);
        tracker_info!(
            "submission accepted as job {} (status {:?})",
            receipt.job_id,
            receipt.initial_status
        );
        Ok(receipt)
    }

    async fn cancel_remote(&self, job_id: &JobId) -> Result<(), TransferError> {
        let url = self.url(&["analysis", job_id.as_str()])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(transfer_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        tracker_debug!("remote cancel acknowledged for job {}", job_id);
        Ok(())
    }
}

async fn read_receipt(response: reqwest::Response) -> Result<TransferReceipt, TransferError> {
    let status = response.status();
    let body = response.bytes().await.map_err(transfer_error)?;
    if !status.is_success() {
        let detail = String::from_utf8_lossy(&body);
        let message = if detail.trim().is_empty() {
            status.to_string()
        } else {
            detail.into_owned()
        };
        return Err(TransferError::new(
            FailureKind::HttpStatus(status.as_u16()),
            message,
        ));
    }
    let parsed: SubmitResponse = serde_json::from_slice(&body)
        .map_err(|err| TransferError::new(FailureKind::InvalidResponse, err.to_string()))?;
    Ok(parsed.into_receipt())
}

/// Streams `bytes` in chunks, reporting progress as each chunk is taken by the
/// transport. Stops short of 100 so completion is only reported once the
/// service accepts the upload.
fn progress_body(bytes: Bytes, progress: Arc<MonotonicProgress>) -> reqwest::Body {
    let total = bytes.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(total)))
        .collect();
    let mut sent = 0usize;
    let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        progress.emit(percent_of(sent, total).min(99));
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

fn percent_of(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent as u128 * 100) / total as u128).min(100) as u8
}

fn transfer_error(err: reqwest::Error) -> TransferError {
    TransferError::new(classify(&err), err.to_string())
}
