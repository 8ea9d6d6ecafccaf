use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Progress store Metrics
    pub static ref STORAGE_WRITE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "storage_write_failures_total",
        "Total number of progress writes that failed and were swallowed",
        &["record"]
    )
    .unwrap();

    pub static ref MALFORMED_RECORDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "malformed_records_total",
        "Total number of stored records discarded because they failed to parse",
        &["record"]
    )
    .unwrap();

    pub static ref IMPLAUSIBLE_PROGRESS_RESETS_TOTAL: IntCounter = register_int_counter!(
        "implausible_progress_resets_total",
        "Total number of chapters reset on first load because of implausible progress"
    )
    .unwrap();

    // Business Metrics
    pub static ref STEP_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "step_submissions_total",
        "Total number of step submissions",
        &["outcome"]
    )
    .unwrap();

    pub static ref POINTS_AWARDED_TOTAL: IntCounter = register_int_counter!(
        "points_awarded_total",
        "Total number of points credited to the learner"
    )
    .unwrap();

    pub static ref BADGES_EARNED_TOTAL: IntCounter = register_int_counter!(
        "badges_earned_total",
        "Total number of chapter badges earned"
    )
    .unwrap();

    pub static ref EXERCISES_NORMALIZED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exercises_normalized_total",
        "Total number of exercises passed through the normalizer",
        &["result"]
    )
    .unwrap();

    pub static ref CATALOG_CHAPTERS: IntGauge = register_int_gauge!(
        "catalog_chapters",
        "Number of chapters in the loaded content catalog"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_write_failure(record: &str) {
    STORAGE_WRITE_FAILURES_TOTAL
        .with_label_values(&[record])
        .inc();
}

pub fn record_malformed(record: &str) {
    MALFORMED_RECORDS_TOTAL.with_label_values(&[record]).inc();
}

pub fn record_submission(outcome: &str) {
    STEP_SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}
