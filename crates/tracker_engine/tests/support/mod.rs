#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracker_core::{JobId, JobSnapshot, Phase, SequenceClock, StatusReport};
use tracker_engine::{
    FailureKind, JobController, Payload, PollError, ProgressSink, PullSource, PushSource,
    PushSubscription, ReportSink, StatusSource, Subscription, TrackerSettings, TransferChannel,
    TransferError, TransferReceipt,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(tracker_logging::initialize_for_tests);
}

pub fn settings() -> TrackerSettings {
    TrackerSettings {
        poll_interval: Duration::from_millis(100),
        max_consecutive_failures: 3,
        ..TrackerSettings::default()
    }
}

pub enum Step {
    Report(StatusReport),
    Fail(&'static str),
}

impl Step {
    /// Report stamped from the shared clock when fetched.
    pub fn phase(phase: Phase) -> Self {
        Step::Report(StatusReport::new(0, phase))
    }
}

/// Pull source replaying a script, then reporting `Processing` forever.
pub struct ScriptedPull {
    steps: Mutex<VecDeque<Step>>,
    clock: Arc<SequenceClock>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started_at: Mutex<Vec<Instant>>,
}

impl ScriptedPull {
    pub fn new(clock: Arc<SequenceClock>, steps: Vec<Step>) -> Arc<Self> {
        Self::with_delay(clock, steps, Duration::ZERO)
    }

    pub fn with_delay(clock: Arc<SequenceClock>, steps: Vec<Step>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            clock,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started_at: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Vec<Instant> {
        self.started_at.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PullSource for ScriptedPull {
    async fn fetch_status(&self, _job_id: &JobId) -> Result<StatusReport, PollError> {
        let sequence = self.clock.next();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started_at.lock().unwrap().push(Instant::now());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Report(mut report)) => {
                if report.sequence == 0 {
                    report.sequence = sequence;
                }
                Ok(report)
            }
            Some(Step::Fail(message)) => Err(PollError::new(FailureKind::Network, message)),
            None => Ok(StatusReport::new(sequence, Phase::Processing)),
        }
    }
}

/// Transfer that emits scripted progress and settles with a scripted outcome,
/// optionally waiting for `release` first.
pub struct ScriptedTransfer {
    progress: Vec<u8>,
    outcome: Mutex<Option<Result<TransferReceipt, TransferError>>>,
    hold: Option<Arc<Notify>>,
    uploads: AtomicUsize,
    remote_cancels: Mutex<Vec<JobId>>,
}

impl ScriptedTransfer {
    pub fn accepting(job_id: &str, progress: Vec<u8>) -> Arc<Self> {
        Self::settling(
            progress,
            Ok(TransferReceipt {
                job_id: JobId::new(job_id),
                initial_status: Some(Phase::Queued),
                message: None,
            }),
            None,
        )
    }

    pub fn settling(
        progress: Vec<u8>,
        outcome: Result<TransferReceipt, TransferError>,
        hold: Option<Arc<Notify>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            progress,
            outcome: Mutex::new(Some(outcome)),
            hold,
            uploads: AtomicUsize::new(0),
            remote_cancels: Mutex::new(Vec::new()),
        })
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn remote_cancels(&self) -> Vec<JobId> {
        self.remote_cancels.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TransferChannel for ScriptedTransfer {
    async fn upload(
        &self,
        _payload: Payload,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<TransferReceipt, TransferError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        for percent in &self.progress {
            progress.emit(*percent);
        }
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.outcome
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(TransferError::new(FailureKind::Network, "script exhausted")))
    }

    async fn cancel_remote(&self, job_id: &JobId) -> Result<(), TransferError> {
        self.remote_cancels.lock().unwrap().push(job_id.clone());
        Ok(())
    }
}

/// Push source that hands its sinks to the test for manual delivery.
#[derive(Default)]
pub struct ManualPush {
    sinks: Mutex<Vec<ReportSink>>,
}

impl ManualPush {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliver(&self, report: StatusReport) {
        let sink = self.sinks.lock().unwrap().last().cloned();
        if let Some(sink) = sink {
            sink(report);
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

impl PushSource for ManualPush {
    fn subscribe(&self, _job_id: &JobId, sink: ReportSink) -> PushSubscription {
        let (subscription, gated, _token) = PushSubscription::new(sink);
        self.sinks.lock().unwrap().push(gated);
        subscription
    }
}

pub struct Observer {
    pub seen: Arc<Mutex<Vec<JobSnapshot>>>,
    pub rx: mpsc::UnboundedReceiver<JobSnapshot>,
    _subscription: Subscription,
}

impl Observer {
    pub fn attach(controller: &JobController) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let recorded = seen.clone();
        let subscription = controller.observe(move |snapshot: &JobSnapshot| {
            recorded.lock().unwrap().push(snapshot.clone());
            let _ = tx.send(snapshot.clone());
        });
        Self {
            seen,
            rx,
            _subscription: subscription,
        }
    }

    pub async fn wait_for(&mut self, phase: Phase) -> JobSnapshot {
        loop {
            let snapshot = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                .await
                .expect("snapshot before timeout")
                .expect("observer channel open");
            if snapshot.phase == phase {
                return snapshot;
            }
        }
    }

    pub async fn wait_for_terminal(&mut self) -> JobSnapshot {
        loop {
            let snapshot = tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
                .await
                .expect("snapshot before timeout")
                .expect("observer channel open");
            if snapshot.phase.is_terminal() {
                return snapshot;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = self.seen.lock().unwrap().iter().map(|s| s.phase).collect();
        phases.dedup();
        phases
    }
}

pub fn controller_with_pull(
    settings: TrackerSettings,
    transfer: Arc<ScriptedTransfer>,
    pull: Arc<ScriptedPull>,
    clock: Arc<SequenceClock>,
) -> JobController {
    JobController::with_parts(settings, transfer, StatusSource::Pull(pull), None, clock)
}
