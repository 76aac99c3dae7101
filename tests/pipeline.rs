//! End-to-end pipeline tests against an in-process collector

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pizza_telemetry::export::HttpExporterConfig;
use pizza_telemetry::sampler::{FixedSampler, ResourceSample};
use pizza_telemetry::store::HttpMethod;
use pizza_telemetry::{CounterStore, Encoder, HttpExporter, Scheduler, Tracker};

/// Minimal collector: one request per connection, canned status
struct MockCollector {
    url: reqwest::Url,
    status: Arc<AtomicU16>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockCollector {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status = Arc::new(AtomicU16::new(200));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (st, reqs) = (status.clone(), requests.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let (st, reqs) = (st.clone(), reqs.clone());
                tokio::spawn(async move { serve(stream, st, reqs).await });
            }
        });

        Self {
            url: reqwest::Url::parse(&format!("http://{addr}/otlp/v1/metrics")).unwrap(),
            status,
            requests,
        }
    }

    fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    fn value_of(&self, name: &str) -> Option<i64> {
        self.requests
            .lock()
            .iter()
            .rev()
            .map(|(_, body)| &body["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0])
            .find(|metric| metric["name"] == name)
            .and_then(|metric| metric["sum"]["dataPoints"][0]["asInt"].as_i64())
    }

    fn count(&self) -> usize {
        self.requests.lock().len()
    }

    fn clear(&self) {
        self.requests.lock().clear();
    }
}

async fn serve(
    mut stream: TcpStream,
    status: Arc<AtomicU16>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let (head, body) = loop {
        let Ok(n) = stream.read(&mut buf).await else {
            return;
        };
        if n == 0 {
            return;
        }
        data.extend_from_slice(&buf[..n]);

        let Some(head_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body_start = head_end + 4;
        if data.len() >= body_start + content_length {
            break (head, data[body_start..body_start + content_length].to_vec());
        }
    };

    if let Ok(value) = serde_json::from_slice(&body) {
        requests.lock().push((head, value));
    }

    let code = status.load(Ordering::SeqCst);
    let response =
        format!("HTTP/1.1 {code} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes()).await;
}

fn scheduler(store: Arc<CounterStore>, collector: &MockCollector, interval: Duration) -> Scheduler {
    let exporter = HttpExporter::new(HttpExporterConfig {
        collector_url: collector.url.clone(),
        bearer_token: "glc_test".to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    Scheduler::new(
        store,
        Arc::new(FixedSampler(ResourceSample {
            cpu_usage_percent: 12.0,
            memory_usage_percent: 48.6,
        })),
        Encoder::new("jwt-pizza-service-test"),
        Arc::new(exporter),
        interval,
    )
}

#[tokio::test]
async fn test_flush_delivers_every_metric_with_auth() {
    let collector = MockCollector::start().await;
    let store = Arc::new(CounterStore::new());
    let tracker = Tracker::new(store.clone());
    let scheduler = scheduler(store, &collector, Duration::from_secs(10));

    for _ in 0..3 {
        tracker.http_request(HttpMethod::Get);
    }
    tracker.http_request(HttpMethod::Post);
    tracker.auth_attempt(true);
    tracker.auth_attempt(true);
    tracker.auth_attempt(false);
    let _session = tracker.begin_session();
    tracker.order_completed(0.0038);
    tracker.order_failed();

    let report = scheduler.flush_once().await;
    assert_eq!(report.failed(), 0);
    assert_eq!(collector.count(), report.delivered);

    assert_eq!(collector.value_of("http_requests_get"), Some(3));
    assert_eq!(collector.value_of("http_requests_post"), Some(1));
    assert_eq!(collector.value_of("http_requests_total"), Some(4));
    assert_eq!(collector.value_of("auth_attempts_successful"), Some(2));
    assert_eq!(collector.value_of("auth_attempts_failed"), Some(1));
    assert_eq!(collector.value_of("active_sessions"), Some(1));
    assert_eq!(collector.value_of("orders_success"), Some(1));
    assert_eq!(collector.value_of("orders_failure"), Some(1));
    assert_eq!(collector.value_of("system_memory_usage"), Some(49));
    assert_eq!(collector.value_of("revenue_total_milli"), Some(4));

    let requests = collector.requests.lock();
    for (head, body) in requests.iter() {
        let head = head.to_ascii_lowercase();
        assert!(head.contains("authorization: bearer glc_test"));
        assert!(head.contains("content-type: application/json"));
        let attributes = body["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["sum"]
            ["dataPoints"][0]["attributes"]
            .as_array()
            .unwrap();
        let source = attributes.last().unwrap();
        assert_eq!(source["key"], "source");
        assert_eq!(source["value"]["stringValue"], "jwt-pizza-service-test");
    }
}

#[tokio::test]
async fn test_second_flush_resets_interval_counters_only() {
    let collector = MockCollector::start().await;
    let store = Arc::new(CounterStore::new());
    let tracker = Tracker::new(store.clone());
    let scheduler = scheduler(store, &collector, Duration::from_secs(10));

    tracker.http_request(HttpMethod::Put);
    tracker.auth_attempt(true);
    tracker.revenue(12.0);
    tracker
        .instrument(HttpMethod::Put, "/api/auth", async {})
        .await;

    scheduler.flush_once().await;
    assert_eq!(collector.value_of("http_requests_put"), Some(2));
    assert_eq!(collector.value_of("endpoint_requests_put"), Some(1));
    assert!(collector.value_of("request_latency_put").is_some());

    collector.clear();
    scheduler.flush_once().await;
    assert_eq!(collector.value_of("http_requests_put"), Some(0));
    assert_eq!(collector.value_of("http_requests_total"), Some(0));
    assert_eq!(collector.value_of("request_latency_put"), None);
    assert_eq!(collector.value_of("endpoint_requests_put"), None);
    assert_eq!(collector.value_of("auth_attempts_successful"), Some(1));
    assert_eq!(collector.value_of("revenue_total_milli"), Some(12_000));
}

#[tokio::test]
async fn test_rejecting_collector_does_not_stop_the_schedule() {
    let collector = MockCollector::start().await;
    collector.set_status(500);
    let store = Arc::new(CounterStore::new());
    let handle = scheduler(store.clone(), &collector, Duration::from_millis(200))
        .with_flush_on_shutdown(false)
        .spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while handle.ticks() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(handle.ticks() >= 2);

    // Recovery: the next tick delivers normally
    collector.set_status(200);
    collector.clear();
    store.increment_http_request(HttpMethod::Patch);
    let target = handle.ticks() + 2;
    while handle.ticks() < target && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle.shutdown().await;

    assert!(collector.count() > 0);
    assert!(collector.value_of("http_requests_patch").is_some());
}

#[tokio::test]
async fn test_unreachable_collector_is_contained() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let exporter = HttpExporter::new(HttpExporterConfig {
        collector_url: reqwest::Url::parse(&format!("http://{addr}/")).unwrap(),
        bearer_token: "t".to_string(),
        timeout: Duration::from_millis(500),
    })
    .unwrap();
    let scheduler = Scheduler::new(
        Arc::new(CounterStore::new()),
        Arc::new(FixedSampler::default()),
        Encoder::new("svc"),
        Arc::new(exporter),
        Duration::from_secs(10),
    );

    let report = scheduler.flush_once().await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.transport_failures, report.attempted());
}
