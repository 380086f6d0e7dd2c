use crate::{JobId, JobSnapshot, Phase};

/// Presentation-ready summary of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub job_id: Option<JobId>,
    pub phase: Phase,
    pub progress_text: Option<String>,
    pub detail: Option<String>,
    pub terminal: bool,
    pub has_result: bool,
}

impl JobSnapshot {
    pub fn view(&self) -> JobView {
        let progress_text = match self.phase {
            Phase::Uploading => Some(format!("{}%", self.progress_percent)),
            Phase::Processing => self.remote_progress.map(|percent| format!("{percent}%")),
            _ => None,
        };

        let detail = match (&self.error_info, &self.transient_error) {
            (Some(error), _) => Some(format!("{}: {}", error.kind, error.message)),
            (None, Some(transient)) => Some(format!("retrying after {}", transient.message)),
            (None, None) => self.message.clone(),
        };

        JobView {
            job_id: self.id.clone(),
            phase: self.phase,
            progress_text,
            detail,
            terminal: self.phase.is_terminal(),
            has_result: self.result.is_some(),
        }
    }
}
