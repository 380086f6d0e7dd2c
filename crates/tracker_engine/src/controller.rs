use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracker_core::{
    Applied, ErrorInfo, ErrorKind, JobId, JobSnapshot, JobStateStore, Msg, Phase, SequenceClock,
    StatusReport, SubscriberId,
};
use tracker_logging::{tracker_debug, tracker_info, tracker_warn};

use crate::push::WebSocketStatusSource;
use crate::scheduler::PollScheduler;
use crate::settings::{StatusTransport, TrackerSettings};
use crate::status::{
    HttpStatusSource, PullSource, PushSubscription, ReportGate, ReportSink, StatusSource,
};
use crate::transfer::{ProgressSink, ReqwestTransfer, TransferChannel};
use crate::{FailureKind, Payload, SubmitError, TransferError, TransferReceipt};

/// Public façade over one job at a time.
///
/// Owns the transfer, the status tracker and the state store. Dropping the
/// controller disposes it.
///
/// Observer callbacks run while the store is locked and must not call back
/// into the controller.
pub struct JobController {
    inner: Arc<Inner>,
}

struct Inner {
    settings: TrackerSettings,
    transfer: Arc<dyn TransferChannel>,
    source: StatusSource,
    fallback: Option<Arc<dyn PullSource>>,
    store: Arc<Mutex<JobStateStore>>,
    clock: Arc<SequenceClock>,
    active: Mutex<Option<ActiveJob>>,
    generation: AtomicU64,
    disposed: AtomicBool,
}

/// Resources owned by the current submission.
struct ActiveJob {
    generation: u64,
    job_id: Option<JobId>,
    token: CancellationToken,
    gate: Arc<ReportGate>,
    tracker: Option<Tracker>,
    watchdog: Option<JoinHandle<()>>,
}

enum Tracker {
    Poll(PollScheduler),
    Push(PushSubscription),
}

#[derive(Clone)]
struct JobTicket {
    generation: u64,
    token: CancellationToken,
    gate: Arc<ReportGate>,
}

/// Observer registration. Dropping it unsubscribes.
#[must_use = "the observer is unsubscribed when the subscription is dropped"]
pub struct Subscription {
    store: Weak<Mutex<JobStateStore>>,
    id: SubscriberId,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            lock(&store).unsubscribe(self.id);
        }
    }
}

impl JobController {
    /// Builds a controller talking HTTP (and WebSocket when configured) to
    /// `settings.base_url`.
    pub fn new(settings: TrackerSettings) -> Result<Self, TransferError> {
        let clock = Arc::new(SequenceClock::new());
        let transfer = Arc::new(ReqwestTransfer::new(settings.clone())?);
        let pull: Arc<dyn PullSource> = Arc::new(
            HttpStatusSource::new(settings.clone(), clock.clone())
                .map_err(|err| TransferError::new(FailureKind::Network, err.message))?,
        );
        let (source, fallback) = match settings.transport {
            StatusTransport::Poll => (StatusSource::Pull(pull), None),
            StatusTransport::Push => {
                let push = Arc::new(WebSocketStatusSource::new(settings.clone(), clock.clone()));
                let fallback = settings.fallback_to_poll.then_some(pull);
                (StatusSource::Push(push), fallback)
            }
        };
        Ok(Self::with_parts(settings, transfer, source, fallback, clock))
    }

    /// Builds a controller from explicit collaborators. `clock` must be the
    /// one the status sources stamp reports with.
    pub fn with_parts(
        settings: TrackerSettings,
        transfer: Arc<dyn TransferChannel>,
        source: StatusSource,
        fallback: Option<Arc<dyn PullSource>>,
        clock: Arc<SequenceClock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                transfer,
                source,
                fallback,
                store: Arc::new(Mutex::new(JobStateStore::new())),
                clock,
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.inner.settings
    }

    /// Submits `payload` and starts tracking the job the service creates.
    ///
    /// Fails immediately with [`SubmitError::AlreadyActive`] while another job
    /// is in flight; nothing is mutated in that case.
    pub async fn submit(&self, payload: Payload) -> Result<JobId, SubmitError> {
        let ticket = self.inner.begin()?;
        tracker_info!("submitting {}", payload.describe());
        ticket.gate.pass(|| {
            lock(&self.inner.store).apply(Msg::UploadStarted);
        });

        let progress = self.inner.progress_sink(&ticket);
        let upload = self.inner.transfer.upload(payload, progress);
        let settled = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            settled = upload => Some(settled),
        };

        match settled {
            None => Err(self.inner.interrupted(&ticket)),
            Some(Err(err)) => {
                self.inner.transfer_failed(&ticket, &err);
                Err(SubmitError::Transfer(err))
            }
            Some(Ok(receipt)) => self.inner.track(&ticket, receipt),
        }
    }

    /// Cancels the active job. A no-op without an active, non-terminal job.
    pub fn cancel(&self) {
        let mut active = lock(&self.inner.active);
        if active.is_none() {
            tracker_debug!("cancel ignored: no active job");
            return;
        }
        if !lock(&self.inner.store).is_active() {
            tracker_debug!("cancel ignored: job already settled");
            return;
        }
        let Some(mut job) = active.take() else {
            return;
        };

        job.teardown();
        if lock(&self.inner.store).apply(Msg::Cancel) == Applied::Accepted {
            tracker_info!("job {:?} cancelled", job.job_id);
        }
        if let Some(job_id) = job.job_id {
            self.inner.notify_remote_cancel(job_id);
        }
    }

    /// Tears down every timer, task and observer. Idempotent; nothing fires
    /// after it returns and later submissions fail with `Disposed`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut job) = lock(&self.inner.active).take() {
            job.teardown();
        }
        let mut store = lock(&self.inner.store);
        store.clear_subscribers();
        store.apply(Msg::Cancel);
        tracker_debug!("job controller disposed");
    }

    /// Registers `callback`; it receives the current snapshot immediately and
    /// then every accepted change.
    pub fn observe(&self, callback: impl FnMut(&JobSnapshot) + Send + 'static) -> Subscription {
        let id = lock(&self.inner.store).subscribe(callback);
        Subscription {
            store: Arc::downgrade(&self.inner.store),
            id,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        lock(&self.inner.store).snapshot()
    }

    pub fn discarded_reports(&self) -> u64 {
        lock(&self.inner.store).discarded_reports()
    }

    /// True while a poll loop or push subscription is running for the job.
    pub fn is_tracking(&self) -> bool {
        lock(&self.inner.active)
            .as_ref()
            .filter(|job| !job.token.is_cancelled())
            .and_then(|job| job.tracker.as_ref())
            .is_some_and(Tracker::is_running)
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn begin(self: &Arc<Self>) -> Result<JobTicket, SubmitError> {
        let mut active = lock(&self.active);
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SubmitError::Disposed);
        }
        {
            let store = lock(&self.store);
            if store.is_active() {
                return Err(SubmitError::AlreadyActive {
                    phase: store.phase(),
                });
            }
        }

        if let Some(mut previous) = active.take() {
            previous.teardown();
        }
        let ticket = JobTicket {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            token: CancellationToken::new(),
            gate: ReportGate::new(),
        };
        let watchdog = self
            .settings
            .max_job_duration
            .map(|limit| self.spawn_watchdog(&ticket, limit));
        *active = Some(ActiveJob {
            generation: ticket.generation,
            job_id: None,
            token: ticket.token.clone(),
            gate: ticket.gate.clone(),
            tracker: None,
            watchdog,
        });
        lock(&self.store).apply(Msg::SubmitStarted);
        Ok(ticket)
    }

    fn progress_sink(&self, ticket: &JobTicket) -> Arc<dyn ProgressSink> {
        let store = self.store.clone();
        let gate = ticket.gate.clone();
        Arc::new(move |percent: u8| {
            gate.pass(|| {
                lock(&store).apply(Msg::UploadProgress(percent));
            });
        })
    }

    fn transfer_failed(&self, ticket: &JobTicket, err: &TransferError) {
        tracker_warn!("transfer failed: {}", err);
        ticket.gate.pass(|| {
            lock(&self.store).apply(Msg::TransferFailed(ErrorInfo::new(
                ErrorKind::Transfer,
                err.to_string(),
            )));
        });
        self.release(ticket.generation);
    }

    /// Seeds the store with the receipt and starts the status tracker.
    fn track(
        self: &Arc<Self>,
        ticket: &JobTicket,
        receipt: TransferReceipt,
    ) -> Result<JobId, SubmitError> {
        let mut active = lock(&self.active);
        let job = match active.as_mut() {
            Some(job) if job.generation == ticket.generation && !job.token.is_cancelled() => job,
            _ => return Err(self.interrupted(ticket)),
        };

        let job_id = receipt.job_id;
        job.job_id = Some(job_id.clone());
        let terminal = {
            let mut store = lock(&self.store);
            store.apply(Msg::TransferAccepted {
                job_id: job_id.clone(),
            });
            if let Some(initial) = receipt
                .initial_status
                .filter(|phase| phase.rank() > Phase::Queued.rank())
            {
                let mut report = StatusReport::new(self.clock.next(), initial);
                if let Some(message) = receipt.message {
                    report = report.with_message(message);
                }
                store.apply(Msg::Report {
                    job_id: job_id.clone(),
                    report,
                });
            }
            store.phase().is_terminal()
        };

        if terminal {
            tracker_info!("job {} settled on submission", job_id);
            if let Some(mut job) = active.take() {
                job.teardown();
            }
            return Ok(job_id);
        }

        let tracker = self.start_tracker(&self.source, job, job_id.clone());
        job.tracker = Some(tracker);
        Ok(job_id)
    }

    fn start_tracker(
        self: &Arc<Self>,
        source: &StatusSource,
        job: &ActiveJob,
        job_id: JobId,
    ) -> Tracker {
        let sink = self.report_sink(job, job_id.clone());
        match source {
            StatusSource::Pull(pull) => {
                tracker_debug!("polling job {} every {:?}", job_id, self.settings.poll_interval);
                let mut scheduler =
                    PollScheduler::new(pull.clone(), self.clock.clone(), &self.settings);
                scheduler.start(job_id, sink);
                Tracker::Poll(scheduler)
            }
            StatusSource::Push(push) => {
                tracker_debug!("subscribing to pushed status of job {}", job_id);
                Tracker::Push(push.subscribe(&job_id, sink))
            }
        }
    }

    /// Sink feeding reports for `job_id` into the store through the job's gate.
    fn report_sink(self: &Arc<Self>, job: &ActiveJob, job_id: JobId) -> ReportSink {
        let store = self.store.clone();
        let token = job.token.clone();
        let generation = job.generation;
        let can_fall_back = self.fallback.is_some();
        let inner = Arc::downgrade(self);

        job.gate.guard(Arc::new(move |report: StatusReport| {
            let closed = report.is_channel_closed();
            let report = if closed && !can_fall_back {
                let error = report.error_info.clone().unwrap_or_else(|| {
                    ErrorInfo::new(ErrorKind::ChannelClosed, "push channel closed")
                });
                StatusReport::new(report.sequence, Phase::Failed).with_error(error)
            } else {
                report
            };

            let (applied, terminal) = {
                let mut store = lock(&store);
                let applied = store.apply(Msg::Report {
                    job_id: job_id.clone(),
                    report,
                });
                (applied, store.phase().is_terminal())
            };
            if let Applied::Discarded(reason) = applied {
                tracker_debug!("discarded report for job {}: {:?}", job_id, reason);
            }

            // Both follow-ups close the gate delivering this report, so they
            // run once the delivery has returned.
            if terminal {
                token.cancel();
                defer(&inner, move |inner| inner.release(generation));
            } else if closed && can_fall_back {
                defer(&inner, move |inner| inner.fall_back_to_poll(generation));
            }
        }))
    }

    /// Drops the tracker and watchdog of a settled job.
    fn release(&self, generation: u64) {
        let mut active = lock(&self.active);
        if !active.as_ref().is_some_and(|job| job.generation == generation) {
            return;
        }
        if let Some(mut job) = active.take() {
            job.teardown();
            tracker_debug!("released resources of job {:?}", job.job_id);
        }
    }

    fn fall_back_to_poll(self: &Arc<Self>, generation: u64) {
        let mut active = lock(&self.active);
        let Some(job) = active
            .as_mut()
            .filter(|job| job.generation == generation && !job.token.is_cancelled())
        else {
            return;
        };
        let (Some(pull), Some(job_id)) = (self.fallback.clone(), job.job_id.clone()) else {
            return;
        };
        tracker_info!("push channel for job {} closed, falling back to polling", job_id);
        let tracker = self.start_tracker(&StatusSource::Pull(pull), job, job_id);
        job.tracker = Some(tracker);
    }

    fn spawn_watchdog(self: &Arc<Self>, ticket: &JobTicket, limit: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let token = ticket.token.clone();
        let generation = ticket.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.expire(generation, limit);
                    }
                }
            }
        })
    }

    fn expire(&self, generation: u64, limit: Duration) {
        let mut active = lock(&self.active);
        if !active.as_ref().is_some_and(|job| job.generation == generation) {
            return;
        }
        let Some(mut job) = active.take() else {
            return;
        };
        job.teardown();
        let applied = lock(&self.store).apply(Msg::Expire {
            message: format!("job exceeded its maximum duration of {limit:?}"),
        });
        if applied == Applied::Accepted {
            tracker_warn!("job {:?} timed out after {:?}", job.job_id, limit);
            if let Some(job_id) = job.job_id {
                self.notify_remote_cancel(job_id);
            }
        }
    }

    fn interrupted(&self, ticket: &JobTicket) -> SubmitError {
        if self.disposed.load(Ordering::SeqCst) {
            return SubmitError::Disposed;
        }
        let current = self.generation.load(Ordering::SeqCst) == ticket.generation;
        let timed_out = lock(&self.store)
            .snapshot()
            .error_info
            .is_some_and(|error| error.kind == ErrorKind::Timeout);
        if current && timed_out {
            SubmitError::TimedOut
        } else {
            SubmitError::Cancelled
        }
    }

    fn notify_remote_cancel(&self, job_id: JobId) {
        let transfer = self.transfer.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = transfer.cancel_remote(&job_id).await {
                        tracker_warn!("remote cancel of job {} failed: {}", job_id, err);
                    }
                });
            }
            Err(_) => tracker_warn!("no runtime available to cancel job {} remotely", job_id),
        }
    }
}

impl ActiveJob {
    /// Closes the gate first so nothing in flight lands after teardown.
    fn teardown(&mut self) {
        self.gate.close();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.stop();
        }
        self.token.cancel();
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

impl Tracker {
    fn stop(&mut self) {
        match self {
            Tracker::Poll(scheduler) => scheduler.stop(),
            Tracker::Push(subscription) => subscription.unsubscribe(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            Tracker::Poll(scheduler) => scheduler.is_running(),
            Tracker::Push(subscription) => subscription.is_active(),
        }
    }
}

/// Runs `work` on the ambient runtime if the controller is still alive.
fn defer(inner: &Weak<Inner>, work: impl FnOnce(&Arc<Inner>) + Send + 'static) {
    let inner = inner.clone();
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Some(inner) = inner.upgrade() {
                work(&inner);
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
