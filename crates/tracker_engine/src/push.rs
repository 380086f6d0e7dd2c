use std::sync::Arc;

use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracker_core::{JobId, SequenceClock, StatusReport};
use tracker_logging::{tracker_debug, tracker_info, tracker_warn};
use url::Url;

use crate::settings::{EndpointError, TrackerSettings};
use crate::status::{PushSource, PushSubscription, ReportSink};
use crate::wire::parse_push_frame;

/// Push source over `/ws/analysis/status/{id}`.
#[derive(Debug, Clone)]
pub struct WebSocketStatusSource {
    settings: TrackerSettings,
    clock: Arc<SequenceClock>,
}

impl WebSocketStatusSource {
    pub fn new(settings: TrackerSettings, clock: Arc<SequenceClock>) -> Self {
        Self { settings, clock }
    }
}

impl PushSource for WebSocketStatusSource {
    fn subscribe(&self, job_id: &JobId, sink: ReportSink) -> PushSubscription {
        let (mut subscription, sink, token) = PushSubscription::new(sink);
        let url = self.settings.push_url(job_id);
        let task = tokio::spawn(read_frames(
            url,
            job_id.clone(),
            self.clock.clone(),
            sink,
            token,
        ));
        subscription.attach(task);
        subscription
    }
}

async fn read_frames(
    url: Result<Url, EndpointError>,
    job_id: JobId,
    clock: Arc<SequenceClock>,
    sink: ReportSink,
    token: CancellationToken,
) {
    let url = match url {
        Ok(url) => url,
        Err(err) => {
            sink(StatusReport::channel_closed(
                clock.next(),
                format!("invalid push url: {err}"),
            ));
            return;
        }
    };

    let connected = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        connected = connect_async(url.as_str()) => connected,
    };
    let mut stream = match connected {
        Ok((stream, _)) => stream,
        Err(err) => {
            sink(StatusReport::channel_closed(
                clock.next(),
                format!("push connect failed: {err}"),
            ));
            return;
        }
    };
    tracker_info!("push channel open for job {}", job_id);

    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => {
                let _ = stream.close(None).await;
                return;
            }
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracker_warn!("dropping non-utf8 push frame for job {}", job_id);
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                sink(StatusReport::channel_closed(
                    clock.next(),
                    "push channel closed by server",
                ));
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                sink(StatusReport::channel_closed(clock.next(), err.to_string()));
                return;
            }
        };

        let report = match parse_push_frame(&text, &clock) {
            Ok(report) => report,
            Err(err) => {
                tracker_warn!("dropping malformed push frame for job {}: {}", job_id, err);
                continue;
            }
        };

        if report.is_terminal() {
            tracker_debug!("push channel for job {} saw terminal report", job_id);
            token.cancel();
            sink(report);
            let _ = stream.close(None).await;
            return;
        }
        sink(report);
    }
}
