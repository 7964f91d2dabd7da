use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all server metrics
const PREFIX: &str = "todo";

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

    // Completion Run Metrics
    pub static ref COMPLETION_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_completion_runs_total"), "Finished completion runs by outcome"),
        &["outcome"]
    ).expect("Failed to create completion_runs_total metric");

    pub static ref COMPLETION_RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_completion_run_duration_seconds"),
            "Completion run duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]),
        &["outcome"]
    ).expect("Failed to create completion_run_duration_seconds metric");

    pub static ref COMPLETION_RUNS_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_completion_runs_active"),
        "Completion runs currently iterating over a list"
    ).expect("Failed to create completion_runs_active metric");

    pub static ref COMPLETION_ITEMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_completion_items_total"), "Items processed by completion runs"),
        &["result"]
    ).expect("Failed to create completion_items_total metric");

    // Progress Subscriber Metrics
    pub static ref PROGRESS_SUBSCRIBERS: Gauge = Gauge::new(
        format!("{PREFIX}_progress_subscribers"),
        "Currently connected progress subscribers"
    ).expect("Failed to create progress_subscribers metric");

    pub static ref PROGRESS_SUBSCRIBERS_DROPPED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_progress_subscribers_dropped_total"),
        "Subscribers dropped after a failed delivery"
    ).expect("Failed to create progress_subscribers_dropped_total metric");

    // Store Metrics
    pub static ref TODO_LISTS_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_lists_total"), "Todo lists in the store"),
        &["kind"]
    ).expect("Failed to create lists_total metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(COMPLETION_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(COMPLETION_RUN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(COMPLETION_RUNS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(COMPLETION_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROGRESS_SUBSCRIBERS.clone()));
    let _ = REGISTRY.register(Box::new(PROGRESS_SUBSCRIBERS_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TODO_LISTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Set after startup and after every list creation or deletion
pub fn set_todo_lists_total(num_lists: usize) {
    TODO_LISTS_TOTAL
        .with_label_values(&["all"])
        .set(num_lists as f64);
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

/// Record a finished completion run. `outcome` is one of
/// "completed", "failed", "cancelled" or "panic".
pub fn record_completion_run(outcome: &str, duration: Duration) {
    COMPLETION_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    COMPLETION_RUN_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn set_completion_run_active(active: bool) {
    if active {
        COMPLETION_RUNS_ACTIVE.inc();
    } else {
        COMPLETION_RUNS_ACTIVE.dec();
    }
}

pub fn record_item_completed() {
    COMPLETION_ITEMS_TOTAL.with_label_values(&["completed"]).inc();
}

pub fn record_item_already_completed() {
    COMPLETION_ITEMS_TOTAL
        .with_label_values(&["already_completed"])
        .inc();
}

pub fn record_item_skipped() {
    COMPLETION_ITEMS_TOTAL.with_label_values(&["skipped"]).inc();
}

pub fn set_progress_subscribers(count: usize) {
    PROGRESS_SUBSCRIBERS.set(count as f64);
}

pub fn record_dropped_subscribers(count: usize) {
    PROGRESS_SUBSCRIBERS_DROPPED_TOTAL.inc_by(count as f64);
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
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
