use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracker_core::{JobId, SequenceClock, StatusReport};
use tracker_logging::{tracker_debug, tracker_trace, tracker_warn};

use crate::settings::{ScheduleStrategy, TrackerSettings};
use crate::status::{PullSource, ReportGate, ReportSink};

/// Shortest spacing between polls; tokio tickers reject a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Turns a pull source into a recurring status check.
///
/// At most one request is in flight: each fetch settles before the next wait
/// begins. The scheduler stops itself on a terminal report and after too many
/// consecutive failures.
pub struct PollScheduler {
    source: Arc<dyn PullSource>,
    clock: Arc<SequenceClock>,
    interval: Duration,
    strategy: ScheduleStrategy,
    max_consecutive_failures: u32,
    running: Option<Running>,
}

struct Running {
    token: CancellationToken,
    gate: Arc<ReportGate>,
    task: JoinHandle<()>,
}

impl PollScheduler {
    pub fn new(
        source: Arc<dyn PullSource>,
        clock: Arc<SequenceClock>,
        settings: &TrackerSettings,
    ) -> Self {
        Self {
            source,
            clock,
            interval: settings.poll_interval.max(MIN_INTERVAL),
            strategy: settings.schedule,
            max_consecutive_failures: settings.max_consecutive_failures.max(1),
            running: None,
        }
    }

    /// Starts polling `job_id`; the first request goes out after one interval.
    /// Restarting stops the previous loop first.
    pub fn start(&mut self, job_id: JobId, sink: ReportSink) {
        self.stop();
        let token = CancellationToken::new();
        let gate = ReportGate::new();
        let poll = PollLoop {
            source: self.source.clone(),
            clock: self.clock.clone(),
            job_id,
            sink: gate.guard(sink),
            token: token.clone(),
            interval: self.interval,
            strategy: self.strategy,
            max_consecutive_failures: self.max_consecutive_failures,
        };
        let task = tokio::spawn(poll.run());
        self.running = Some(Running { token, gate, task });
    }

    /// Drops any pending wait and in-flight request. Idempotent; once this
    /// returns no report reaches the sink.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.gate.close();
            running.token.cancel();
            running.task.abort();
        }
    }

    /// False once stopped, self-stopped, finished, or never started.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.token.is_cancelled() && !running.task.is_finished())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    source: Arc<dyn PullSource>,
    clock: Arc<SequenceClock>,
    job_id: JobId,
    sink: ReportSink,
    token: CancellationToken,
    interval: Duration,
    strategy: ScheduleStrategy,
    max_consecutive_failures: u32,
}

impl PollLoop {
    async fn run(self) {
        let mut ticker = match self.strategy {
            ScheduleStrategy::Interval => {
                let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            ScheduleStrategy::RecursiveTimeout => None,
        };
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = wait(ticker.as_mut(), self.interval) => {}
            }

            tracker_trace!("polling status of job {}", self.job_id);
            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                fetched = self.source.fetch_status(&self.job_id) => fetched,
            };

            let report = match fetched {
                Ok(report) => {
                    failures = 0;
                    report
                }
                Err(err) => {
                    failures += 1;
                    if failures >= self.max_consecutive_failures {
                        tracker_warn!(
                            "giving up on job {} after {} failed polls: {}",
                            self.job_id,
                            failures,
                            err
                        );
                        StatusReport::polling_exhausted(
                            self.clock.next(),
                            format!("{failures} consecutive status polls failed, last: {err}"),
                        )
                    } else {
                        tracker_warn!(
                            "status poll {} of {} failed for job {}: {}",
                            failures,
                            self.max_consecutive_failures,
                            self.job_id,
                            err
                        );
                        StatusReport::transient(self.clock.next(), err.to_string())
                    }
                }
            };

            if report.is_terminal() {
                tracker_debug!("poll loop for job {} reached a terminal report", self.job_id);
                self.token.cancel();
                (self.sink)(report);
                return;
            }
            (self.sink)(report);
        }
    }
}

async fn wait(ticker: Option<&mut Interval>, interval: Duration) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => tokio::time::sleep(interval).await,
    }
}
