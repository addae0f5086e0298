use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all broadcaster metrics
const PREFIX: &str = "broadcaster";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // SSE Metrics
    pub static ref SSE_CONNECTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_sse_connections"),
        "Number of live SSE user connections"
    ).expect("Failed to create sse_connections metric");

    pub static ref SSE_FRAMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_sse_frames_total"), "SSE notification frames by write result"),
        &["result"]
    ).expect("Failed to create sse_frames_total metric");

    // Push Metrics
    pub static ref PUSH_SENDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_push_sends_total"), "Push messages by outcome"),
        &["outcome"]
    ).expect("Failed to create push_sends_total metric");

    pub static ref TOKENS_PRUNED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_tokens_pruned_total"), "Push tokens deleted by reason"),
        &["reason"]
    ).expect("Failed to create tokens_pruned_total metric");

    // Webhook Metrics
    pub static ref WEBHOOK_ACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_webhook_acks_total"), "Webhook events by acknowledgment outcome"),
        &["outcome"]
    ).expect("Failed to create webhook_acks_total metric");

    // Ledger Metrics
    pub static ref STATUS_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_status_transitions_total"), "Notification status changes by new status"),
        &["status"]
    ).expect("Failed to create status_transitions_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Already-registered errors are expected when tests call this repeatedly.
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SSE_CONNECTIONS.clone()));
    let _ = REGISTRY.register(Box::new(SSE_FRAMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_SENDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TOKENS_PRUNED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(WEBHOOK_ACKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STATUS_TRANSITIONS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn set_sse_connections(count: usize) {
    SSE_CONNECTIONS.set(count as f64);
}

pub fn record_sse_frames(written: usize, failed: usize) {
    SSE_FRAMES_TOTAL
        .with_label_values(&["written"])
        .inc_by(written as u64);
    SSE_FRAMES_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
}

/// Record `count` push messages ending with `outcome`
pub fn record_push_send(outcome: &str, count: usize) {
    if count == 0 {
        return;
    }
    PUSH_SENDS_TOTAL
        .with_label_values(&[outcome])
        .inc_by(count as u64);
}

pub fn record_tokens_pruned(reason: &str, count: usize) {
    if count == 0 {
        return;
    }
    TOKENS_PRUNED_TOTAL
        .with_label_values(&[reason])
        .inc_by(count as u64);
}

pub fn record_webhook_ack(outcome: &str) {
    WEBHOOK_ACKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_status_transition(status: &str) {
    STATUS_TRANSITIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
