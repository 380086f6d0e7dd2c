//! JSON shapes exchanged with the remote evaluation service.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracker_core::{JobId, Phase, SequenceClock, StatusReport};

use crate::TransferReceipt;

#[derive(Debug, Serialize)]
pub(crate) struct EvaluateRequest<'a> {
    pub pitch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_url: Option<&'a str>,
}

/// Response to `POST /upload` (`id`) and `POST /analysis/evaluate` (`analysisId`).
#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    #[serde(alias = "analysisId", alias = "analysis_id")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn into_receipt(self) -> TransferReceipt {
        TransferReceipt {
            job_id: JobId::new(self.id),
            initial_status: self.status.as_deref().and_then(Phase::from_remote),
            message: self.message,
        }
    }
}

/// Body of the status endpoints. Extra document fields are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

impl StatusBody {
    pub fn into_report(self, sequence: u64) -> Result<StatusReport, String> {
        let phase = Phase::from_remote(&self.status)
            .ok_or_else(|| format!("unknown status {:?}", self.status))?;
        Ok(build_report(
            sequence,
            phase,
            self.result,
            self.message,
            self.progress,
        ))
    }
}

/// Frame on the push channel: either status-shaped or a `progress_update`.
#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    sequence: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
}

/// Parses a push frame, stamping it from `clock` unless it carries its own sequence.
pub(crate) fn parse_push_frame(text: &str, clock: &SequenceClock) -> Result<StatusReport, String> {
    let frame: PushFrame = serde_json::from_str(text).map_err(|err| err.to_string())?;
    let phase = match (&frame.status, frame.kind.as_deref()) {
        (Some(status), _) => {
            Phase::from_remote(status).ok_or_else(|| format!("unknown status {status:?}"))?
        }
        (None, Some("progress_update")) => Phase::Processing,
        (None, other) => return Err(format!("frame without status (type {other:?})")),
    };
    let sequence = match frame.sequence {
        Some(sequence) => {
            clock.witness(sequence);
            sequence
        }
        None => clock.next(),
    };
    Ok(build_report(
        sequence,
        phase,
        frame.result,
        frame.message,
        frame.progress,
    ))
}

fn build_report(
    sequence: u64,
    phase: Phase,
    result: Option<Value>,
    message: Option<String>,
    progress: Option<f64>,
) -> StatusReport {
    let mut report = StatusReport::new(sequence, phase);
    if let Some(result) = result {
        report = report.with_result(result);
    }
    if let Some(message) = message {
        report = report.with_message(message);
    }
    if let Some(progress) = progress {
        report = report.with_progress(progress.clamp(0.0, 100.0).round() as u8);
    }
    report
}
