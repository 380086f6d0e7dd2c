use chrono::{TimeZone, Utc};
use tracker_core::{ErrorInfo, ErrorKind, JobId, JobSnapshot, Phase};

fn snapshot(phase: Phase) -> JobSnapshot {
    let mut snapshot = JobSnapshot::idle(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    snapshot.id = Some(JobId::new("v1"));
    snapshot.phase = phase;
    snapshot
}

#[test]
fn uploading_view_shows_upload_percent() {
    let mut job = snapshot(Phase::Uploading);
    job.progress_percent = 47;
    job.remote_progress = Some(5);

    let view = job.view();
    assert_eq!(view.progress_text.as_deref(), Some("47%"));
    assert!(!view.terminal);
}

#[test]
fn processing_view_prefers_remote_progress() {
    let mut job = snapshot(Phase::Processing);
    job.progress_percent = 100;
    job.remote_progress = Some(60);
    job.message = Some("Market analyst reviewing".to_string());

    let view = job.view();
    assert_eq!(view.progress_text.as_deref(), Some("60%"));
    assert_eq!(view.detail.as_deref(), Some("Market analyst reviewing"));
}

#[test]
fn failed_view_names_error_kind() {
    let mut job = snapshot(Phase::Failed);
    job.error_info = Some(ErrorInfo::new(ErrorKind::PollingExhausted, "3 failed polls"));

    let view = job.view();
    assert!(view.terminal);
    assert_eq!(
        view.detail.as_deref(),
        Some("polling-exhausted: 3 failed polls")
    );
}

#[test]
fn transient_error_shows_as_retry() {
    let mut job = snapshot(Phase::Processing);
    job.transient_error = Some(ErrorInfo::new(ErrorKind::Transient, "http status 502"));

    assert_eq!(
        job.view().detail.as_deref(),
        Some("retrying after http status 502")
    );
}

#[test]
fn completed_view_flags_a_result() {
    let mut job = snapshot(Phase::Completed);
    assert!(!job.view().has_result);

    job.result = Some(serde_json::json!({"score": 82}));
    let view = job.view();
    assert!(view.terminal);
    assert!(view.has_result);
}
