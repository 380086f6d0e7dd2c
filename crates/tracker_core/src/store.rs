use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{ErrorInfo, ErrorKind, JobId, JobSnapshot, Msg, Phase, StatusReport};

pub type Subscriber = Box<dyn FnMut(&JobSnapshot) + Send>;

type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Outcome of [`JobStateStore::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Report sequence did not exceed the stored one.
    Stale,
    /// The job already reached a terminal phase.
    AfterTerminal,
    /// Report names a job other than the tracked one.
    ForeignJob,
    /// The message has no transition from the current phase.
    OutOfPhase,
    /// Accepting the message would change nothing.
    Unchanged,
}

/// Sole writer of the job record and source of truth for observers.
///
/// Every accepted message produces exactly one synchronous notification, in
/// application order. Discarded messages leave the record and the observers
/// untouched.
pub struct JobStateStore {
    job: JobSnapshot,
    subscribers: Vec<(SubscriberId, Subscriber)>,
    next_subscriber: u64,
    discarded_reports: u64,
    now: NowFn,
}

impl Default for JobStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStateStore")
            .field("job", &self.job)
            .field("subscribers", &self.subscribers.len())
            .field("discarded_reports", &self.discarded_reports)
            .finish()
    }
}

impl JobStateStore {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Builds a store whose timestamps come from `now`.
    pub fn with_clock(now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        let now: NowFn = Arc::new(now);
        Self {
            job: JobSnapshot::idle(now()),
            subscribers: Vec::new(),
            next_subscriber: 0,
            discarded_reports: 0,
            now,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.job.clone()
    }

    pub fn phase(&self) -> Phase {
        self.job.phase
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job.id.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.job.is_active()
    }

    /// Number of status reports dropped as stale, late or foreign.
    pub fn discarded_reports(&self) -> u64 {
        self.discarded_reports
    }

    /// Registers `callback`, replaying the current snapshot to it immediately.
    pub fn subscribe(
        &mut self,
        mut callback: impl FnMut(&JobSnapshot) + Send + 'static,
    ) -> SubscriberId {
        callback(&self.job);
        self.next_subscriber += 1;
        let id = SubscriberId(self.next_subscriber);
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Single entry point for every mutation of the job record.
    pub fn apply(&mut self, msg: Msg) -> Applied {
        let is_report = matches!(msg, Msg::Report { .. });
        let outcome = self.transition(msg);
        match outcome {
            Applied::Accepted => {
                self.job.updated_at = (self.now)();
                self.notify();
            }
            Applied::Discarded(_) if is_report => self.discarded_reports += 1,
            Applied::Discarded(_) => {}
        }
        outcome
    }

    fn transition(&mut self, msg: Msg) -> Applied {
        let phase = self.job.phase;
        match msg {
            Msg::SubmitStarted => {
                if phase != Phase::Idle && !phase.is_terminal() {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job = JobSnapshot::idle((self.now)());
                self.job.phase = Phase::Submitting;
                Applied::Accepted
            }
            Msg::UploadStarted => {
                if phase != Phase::Submitting {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job.phase = Phase::Uploading;
                self.job.progress_percent = 0;
                Applied::Accepted
            }
            Msg::UploadProgress(percent) => {
                if phase != Phase::Uploading {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                let percent = percent.min(100);
                if percent <= self.job.progress_percent {
                    return Applied::Discarded(DiscardReason::Unchanged);
                }
                self.job.progress_percent = percent;
                Applied::Accepted
            }
            Msg::TransferAccepted { job_id } => {
                if !matches!(phase, Phase::Submitting | Phase::Uploading) {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job.id = Some(job_id);
                self.job.phase = Phase::Queued;
                self.job.progress_percent = 100;
                self.job.status_sequence = 0;
                Applied::Accepted
            }
            Msg::TransferFailed(error) => {
                if !matches!(phase, Phase::Submitting | Phase::Uploading) {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job.phase = Phase::Failed;
                self.job.error_info = Some(error);
                Applied::Accepted
            }
            Msg::Report { job_id, report } => self.apply_report(job_id, report),
            Msg::Cancel => {
                if !self.job.is_active() {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job.phase = Phase::Cancelled;
                self.job.transient_error = None;
                Applied::Accepted
            }
            Msg::Expire { message } => {
                if !self.job.is_active() {
                    return Applied::Discarded(DiscardReason::OutOfPhase);
                }
                self.job.phase = Phase::Failed;
                self.job.transient_error = None;
                self.job.error_info = Some(ErrorInfo::new(ErrorKind::Timeout, message));
                Applied::Accepted
            }
        }
    }

    fn apply_report(&mut self, job_id: JobId, report: StatusReport) -> Applied {
        if self.job.phase.is_terminal() {
            return Applied::Discarded(DiscardReason::AfterTerminal);
        }
        if self.job.id.as_ref() != Some(&job_id) {
            return Applied::Discarded(DiscardReason::ForeignJob);
        }
        if report.sequence <= self.job.status_sequence {
            return Applied::Discarded(DiscardReason::Stale);
        }

        let StatusReport {
            sequence,
            phase,
            progress_percent,
            result,
            error_info,
            message,
        } = report;

        self.job.status_sequence = sequence;
        if let Some(percent) = progress_percent {
            self.job.remote_progress = Some(percent.min(100));
        }
        if let Some(message) = &message {
            self.job.message = Some(message.clone());
        }

        let Some(reported) = phase else {
            self.job.transient_error = error_info;
            return Applied::Accepted;
        };
        self.job.transient_error = None;

        // Phases never regress; an older phase still contributes its other fields.
        let next = if reported.rank() < self.job.phase.rank() {
            self.job.phase
        } else {
            reported
        };
        match next {
            Phase::Completed => {
                self.job.result = result;
            }
            Phase::Failed => {
                let error = error_info.unwrap_or_else(|| {
                    ErrorInfo::new(
                        ErrorKind::RemoteFailure,
                        message.unwrap_or_else(|| "remote service reported failure".to_string()),
                    )
                });
                self.job.error_info = Some(error);
            }
            Phase::Cancelled => {}
            _ => {
                if let Some(preliminary) = result {
                    self.job.preliminary_result = Some(preliminary);
                }
            }
        }
        self.job.phase = next;
        Applied::Accepted
    }

    fn notify(&mut self) {
        let snapshot = self.job.clone();
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&snapshot);
        }
    }
}
