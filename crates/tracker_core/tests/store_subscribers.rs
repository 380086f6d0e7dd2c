use std::sync::{Arc, Mutex};

use tracker_core::{JobId, JobSnapshot, JobStateStore, Msg, Phase, SequenceClock, StatusReport};

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<JobSnapshot>>>,
}

impl Recorder {
    fn callback(&self) -> impl FnMut(&JobSnapshot) + Send + 'static {
        let seen = self.seen.clone();
        move |snapshot: &JobSnapshot| seen.lock().unwrap().push(snapshot.clone())
    }

    fn phases(&self) -> Vec<Phase> {
        self.seen.lock().unwrap().iter().map(|s| s.phase).collect()
    }

    fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[test]
fn subscribe_replays_current_snapshot() {
    let mut store = JobStateStore::new();
    store.apply(Msg::SubmitStarted);

    let recorder = Recorder::default();
    store.subscribe(recorder.callback());

    assert_eq!(recorder.phases(), vec![Phase::Submitting]);
}

#[test]
fn every_accepted_message_notifies_once() {
    let mut store = JobStateStore::new();
    let recorder = Recorder::default();
    store.subscribe(recorder.callback());

    let job_id = JobId::new("a1");
    store.apply(Msg::SubmitStarted);
    store.apply(Msg::UploadStarted);
    store.apply(Msg::UploadProgress(50));
    store.apply(Msg::TransferAccepted {
        job_id: job_id.clone(),
    });
    store.apply(Msg::Report {
        job_id: job_id.clone(),
        report: StatusReport::new(1, Phase::Processing),
    });
    store.apply(Msg::Report {
        job_id,
        report: StatusReport::new(2, Phase::Completed),
    });

    assert_eq!(
        recorder.phases(),
        vec![
            Phase::Idle,
            Phase::Submitting,
            Phase::Uploading,
            Phase::Uploading,
            Phase::Queued,
            Phase::Processing,
            Phase::Completed,
        ]
    );
}

#[test]
fn discarded_messages_do_not_notify() {
    let mut store = JobStateStore::new();
    let job_id = JobId::new("a1");
    store.apply(Msg::SubmitStarted);
    store.apply(Msg::UploadStarted);
    store.apply(Msg::TransferAccepted {
        job_id: job_id.clone(),
    });
    store.apply(Msg::Report {
        job_id: job_id.clone(),
        report: StatusReport::new(2, Phase::Processing),
    });

    let recorder = Recorder::default();
    store.subscribe(recorder.callback());
    store.apply(Msg::Report {
        job_id: job_id.clone(),
        report: StatusReport::new(2, Phase::Processing),
    });
    store.apply(Msg::Report {
        job_id,
        report: StatusReport::new(1, Phase::Completed),
    });
    store.apply(Msg::UploadProgress(10));

    assert_eq!(recorder.len(), 1);
}

#[test]
fn unsubscribed_callback_stops_receiving() {
    let mut store = JobStateStore::new();
    let first = Recorder::default();
    let second = Recorder::default();
    let first_id = store.subscribe(first.callback());
    store.subscribe(second.callback());

    assert!(store.unsubscribe(first_id));
    assert!(!store.unsubscribe(first_id));
    store.apply(Msg::SubmitStarted);

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);
    assert_eq!(store.subscriber_count(), 1);

    store.clear_subscribers();
    store.apply(Msg::UploadStarted);
    assert_eq!(second.len(), 2);
}

#[test]
fn snapshot_is_a_detached_copy() {
    let mut store = JobStateStore::new();
    store.apply(Msg::SubmitStarted);

    let mut copy = store.snapshot();
    copy.phase = Phase::Completed;
    copy.message = Some("edited".to_string());

    assert_eq!(store.phase(), Phase::Submitting);
    assert_eq!(store.snapshot().message, None);
}

#[test]
fn sequence_clock_orders_after_witnessed_tokens() {
    let clock = SequenceClock::new();
    assert_eq!(clock.next(), 1);
    clock.witness(10);
    assert_eq!(clock.next(), 11);
    clock.witness(3);
    assert_eq!(clock.current(), 11);
}
