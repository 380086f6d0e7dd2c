use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tracker_core::{JobId, Phase};
use tracker_engine::{
    FailureKind, Payload, ProgressSink, ReqwestTransfer, TrackerSettings, TransferChannel,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<u8>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<u8> {
        self.seen.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, percent: u8) {
        self.seen.lock().unwrap().push(percent);
    }
}

fn transfer_for(server: &MockServer) -> ReqwestTransfer {
    ReqwestTransfer::new(TrackerSettings {
        base_url: server.uri(),
        ..TrackerSettings::default()
    })
    .expect("client builds")
}

#[tokio::test]
async fn document_upload_is_multipart_with_monotonic_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "doc-1",
            "filename": "deck.pdf",
            "status": "uploaded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let payload = Payload::document("deck.pdf", vec![7u8; 300 * 1024]);

    let receipt = transfer.upload(payload, sink.clone()).await.expect("upload ok");
    assert_eq!(receipt.job_id, JobId::new("doc-1"));
    assert_eq!(receipt.initial_status, Some(Phase::Queued));

    let progress = sink.take();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(progress.len() > 2, "no intermediate progress: {progress:?}");

    let requests = server.received_requests().await.expect("recording enabled");
    let content_type = requests[0]
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"deck.pdf\""));
}

#[tokio::test]
async fn pitch_is_sent_to_the_evaluation_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis/evaluate"))
        .and(body_partial_json(json!({"pitch": "We sell shovels to miners"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "analysisId": "an-1",
            "status": "processing",
            "message": "Analysis started"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let receipt = transfer
        .upload(Payload::Pitch("We sell shovels to miners".into()), sink.clone())
        .await
        .expect("evaluation accepted");

    assert_eq!(receipt.job_id, JobId::new("an-1"));
    assert_eq!(receipt.initial_status, Some(Phase::Processing));
    assert_eq!(receipt.message.as_deref(), Some("Analysis started"));
    assert_eq!(sink.take(), vec![0, 100]);
}

#[tokio::test]
async fn url_payload_carries_the_website_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis/evaluate"))
        .and(body_partial_json(json!({"website_url": "https://example.com/startup"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "analysis_id": "an-2",
            "status": "pending"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    let receipt = transfer
        .upload(
            Payload::Url("https://example.com/startup".into()),
            Arc::new(RecordingSink::default()),
        )
        .await
        .expect("evaluation accepted");
    assert_eq!(receipt.job_id, JobId::new("an-2"));
}

#[tokio::test]
async fn rejected_upload_reports_http_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    let sink = Arc::new(RecordingSink::default());
    let err = transfer
        .upload(Payload::document("deck.pdf", vec![1u8; 16]), sink.clone())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(500));
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.message, "disk full");
    assert!(!sink.take().contains(&100));
}

#[tokio::test]
async fn unparseable_receipt_is_an_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    let err = transfer
        .upload(Payload::Pitch("pitch".into()), Arc::new(RecordingSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidResponse);
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analysis/evaluate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"analysisId": "an-3"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let transfer = ReqwestTransfer::new(TrackerSettings {
        base_url: server.uri(),
        request_timeout: Duration::from_millis(200),
        ..TrackerSettings::default()
    })
    .expect("client builds");
    let err = transfer
        .upload(Payload::Pitch("pitch".into()), Arc::new(RecordingSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn unreachable_service_is_a_network_failure() {
    let transfer = ReqwestTransfer::new(TrackerSettings {
        base_url: "http://127.0.0.1:1".into(),
        ..TrackerSettings::default()
    })
    .expect("client builds");
    let err = transfer
        .upload(Payload::Pitch("pitch".into()), Arc::new(RecordingSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Network);
}

#[tokio::test]
async fn malformed_base_url_is_rejected_before_sending() {
    let transfer = ReqwestTransfer::new(TrackerSettings {
        base_url: "not a url".into(),
        ..TrackerSettings::default()
    })
    .expect("client builds");
    let err = transfer
        .upload(Payload::Pitch("pitch".into()), Arc::new(RecordingSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}

#[tokio::test]
async fn remote_cancel_deletes_the_analysis() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/analysis/an-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let transfer = transfer_for(&server);
    transfer
        .cancel_remote(&JobId::new("an-9"))
        .await
        .expect("cancel acknowledged");
}
