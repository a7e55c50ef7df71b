use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all enhancer metrics
const PREFIX: &str = "enhancer";

lazy_static! {
    // Global Prometheus registry
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

    // Job Metrics
    pub static ref JOBS_SUBMITTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_jobs_submitted_total"),
        "Jobs accepted into the queue"
    ).expect("Failed to create jobs_submitted_total metric");

    pub static ref JOBS_CLAIMED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_jobs_claimed_total"),
        "Jobs claimed by a worker of this process"
    ).expect("Failed to create jobs_claimed_total metric");

    pub static ref CLAIM_RACES_LOST_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_claim_races_lost_total"),
        "Claim attempts that found the job already taken"
    ).expect("Failed to create claim_races_lost_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs finalized, by terminal status"),
        &["status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Wall-clock time from claim to terminal state"
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["status"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref STALE_RUNNING_JOBS: Gauge = Gauge::new(
        format!("{PREFIX}_stale_running_jobs"),
        "Running jobs whose record has not advanced past the stale threshold"
    ).expect("Failed to create stale_running_jobs metric");

    // Pipeline Metrics
    pub static ref TRANSCODE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_transcode_duration_seconds"),
            "Duration of one transcoding engine invocation"
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]),
        &["stage", "result"]
    ).expect("Failed to create transcode_duration_seconds metric");

    pub static ref SEPARATION_FALLBACKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_separation_fallbacks_total"),
            "Two-stage attempts downgraded to single pass, by reason"
        ),
        &["reason"]
    ).expect("Failed to create separation_fallbacks_total metric");

    // Live Feed Metrics
    pub static ref ACTIVE_EVENT_FEEDS: Gauge = Gauge::new(
        format!("{PREFIX}_active_event_feeds"),
        "Open live event feed connections"
    ).expect("Failed to create active_event_feeds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Already-registered errors are expected when tests call this repeatedly
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_CLAIMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLAIM_RACES_LOST_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(STALE_RUNNING_JOBS.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SEPARATION_FALLBACKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_EVENT_FEEDS.clone()));

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

pub fn record_job_submitted() {
    JOBS_SUBMITTED_TOTAL.inc();
}

pub fn record_job_claimed() {
    JOBS_CLAIMED_TOTAL.inc();
}

pub fn record_claim_lost() {
    CLAIM_RACES_LOST_TOTAL.inc();
}

/// Record a job reaching a terminal status
pub fn record_job_finished(status: &str, duration: Duration) {
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

pub fn set_stale_running_jobs(count: usize) {
    STALE_RUNNING_JOBS.set(count as f64);
}

/// Record one transcoding engine invocation
pub fn record_transcode(stage: &str, ok: bool, duration: Duration) {
    let result = if ok { "ok" } else { "error" };
    TRANSCODE_DURATION_SECONDS
        .with_label_values(&[stage, result])
        .observe(duration.as_secs_f64());
}

pub fn record_separation_fallback(reason: &str) {
    SEPARATION_FALLBACKS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn event_feed_opened() {
    ACTIVE_EVENT_FEEDS.inc();
}

pub fn event_feed_closed() {
    ACTIVE_EVENT_FEEDS.dec();
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
