use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use inferruntime::alert::{
    Alert, AlertChannel, AlertDispatcher, AlertError, AlertOutcome, AlertRequest, RateLimiter,
    WebhookChannel, WebhookConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Recording {
    name: &'static str,
    seen: Mutex<Vec<String>>,
}

impl Recording {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AlertChannel for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        self.seen.lock().push(alert.request.error_message.clone());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl AlertChannel for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _alert: &Alert) -> Result<(), AlertError> {
        Err(AlertError::Delivery {
            channel: "broken".to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

fn request() -> AlertRequest {
    AlertRequest::new("node_execution_failed", "detector returned HTTP 500")
        .with_context("node_id", "detect")
}

#[test]
fn test_error_key_truncates_message() {
    let long = "x".repeat(250);
    let key = AlertRequest::new("boom", long).error_key();
    assert_eq!(key, format!("boom:{}", "x".repeat(100)));
}

#[tokio::test]
async fn test_eleventh_alert_in_window_is_suppressed() {
    let channel = Recording::new("memory");
    let dispatcher = AlertDispatcher::new(10).with_channel(channel.clone());
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    for minute in 0..10 {
        let outcome = dispatcher
            .send_alert_at(request(), false, start + Duration::minutes(minute))
            .await;
        assert!(matches!(outcome, AlertOutcome::Dispatched { .. }), "{outcome:?}");
    }
    let eleventh = dispatcher
        .send_alert_at(request(), false, start + Duration::minutes(30))
        .await;
    assert_eq!(eleventh, AlertOutcome::Suppressed);
    assert_eq!(channel.seen.lock().len(), 10);

    // the first two entries have left the window
    let later = dispatcher
        .send_alert_at(request(), false, start + Duration::minutes(61))
        .await;
    assert!(matches!(later, AlertOutcome::Dispatched { .. }));
}

#[tokio::test]
async fn test_distinct_keys_are_limited_separately() {
    let dispatcher = AlertDispatcher::new(1).with_channel(Recording::new("memory"));
    let now = Utc::now();

    let first = dispatcher.send_alert_at(request(), false, now).await;
    let other = dispatcher
        .send_alert_at(AlertRequest::new("disk_full", "no space"), false, now)
        .await;
    let repeat = dispatcher.send_alert_at(request(), false, now).await;

    assert!(matches!(first, AlertOutcome::Dispatched { .. }));
    assert!(matches!(other, AlertOutcome::Dispatched { .. }));
    assert_eq!(repeat, AlertOutcome::Suppressed);
}

#[tokio::test]
async fn test_force_bypasses_limit_but_is_counted() {
    let dispatcher = AlertDispatcher::new(1).with_channel(Recording::new("memory"));
    let now = Utc::now();
    let key = request().error_key();

    dispatcher.send_alert_at(request(), false, now).await;
    let forced = dispatcher.send_alert_at(request(), true, now).await;

    assert!(matches!(forced, AlertOutcome::Dispatched { .. }));
    assert_eq!(dispatcher.limiter().recent_count_at(&key, now), 2);
}

#[tokio::test]
async fn test_no_channels() {
    let dispatcher = AlertDispatcher::new(10);
    assert_eq!(
        dispatcher.send_alert(request(), false).await,
        AlertOutcome::NoChannels
    );
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let healthy = Recording::new("memory");
    let dispatcher = AlertDispatcher::new(10)
        .with_channel(Arc::new(Broken))
        .with_channel(healthy.clone());

    let outcome = dispatcher.send_alert(request(), false).await;

    match outcome {
        AlertOutcome::Dispatched { delivered, failed } => {
            assert_eq!(delivered, vec!["memory".to_string()]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "broken");
            assert!(failed[0].1.contains("connection refused"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(healthy.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_webhook_channel_posts_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let ok = WebhookChannel::new(WebhookConfig {
        url: format!("{}/hook", server.uri()),
        timeout: std::time::Duration::from_secs(2),
    });
    let failing = WebhookChannel::new(WebhookConfig {
        url: format!("{}/broken", server.uri()),
        timeout: std::time::Duration::from_secs(2),
    });

    let dispatcher = AlertDispatcher::new(10)
        .with_channel(Arc::new(ok))
        .with_channel(Arc::new(failing));
    let outcome = dispatcher.send_alert(request(), false).await;

    match outcome {
        AlertOutcome::Dispatched { delivered, failed } => {
            assert_eq!(delivered, vec!["webhook".to_string()]);
            assert_eq!(failed.len(), 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let received = server.received_requests().await.unwrap();
    let hook = received
        .iter()
        .find(|r| r.url.path() == "/hook")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&hook.body).unwrap();
    assert_eq!(body["alert"]["error_type"], "node_execution_failed");
    assert_eq!(body["alert"]["context"]["node_id"], "detect");
    assert!(body["text"].as_str().unwrap().contains("detector returned HTTP 500"));
}

#[test]
fn test_limiter_prunes_lazily() {
    let limiter = RateLimiter::new(2, Duration::minutes(10));
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    assert!(limiter.try_acquire_at("k", t0, false));
    assert!(limiter.try_acquire_at("k", t0 + Duration::minutes(1), false));
    assert!(!limiter.try_acquire_at("k", t0 + Duration::minutes(9), false));
    assert!(limiter.try_acquire_at("k", t0 + Duration::minutes(10), false));
    assert_eq!(limiter.recent_count_at("k", t0 + Duration::minutes(10)), 2);
}
