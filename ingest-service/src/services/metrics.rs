//! Prometheus metrics for ingest-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for ingestion jobs by terminal status.
pub static JOBS_PROCESSED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_jobs_total",
        "Total number of ingestion jobs by terminal status",
        &["status"]
    )
    .expect("Failed to register JOBS_PROCESSED")
});

/// Counter for per-row reconciliation outcomes.
pub static ROW_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_row_outcomes_total",
        "Total number of classified rows by outcome",
        &["status"]
    )
    .expect("Failed to register ROW_OUTCOMES")
});

/// Counter for rows rejected during canonicalization.
pub static ROWS_REJECTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_rows_rejected_total",
        "Total number of rows rejected during field resolution",
        &["reason"]
    )
    .expect("Failed to register ROWS_REJECTED")
});

/// Counter for fingerprint claim decisions.
pub static FINGERPRINT_CLAIMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_fingerprint_claims_total",
        "Total number of fingerprint claim decisions",
        &["decision"]
    )
    .expect("Failed to register FINGERPRINT_CLAIMS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingest_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Histogram for end-to-end job processing duration.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingest_job_duration_seconds",
        "End-to-end job processing duration in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .expect("Failed to register JOB_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingest_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&JOBS_PROCESSED);
    Lazy::force(&ROW_OUTCOMES);
    Lazy::force(&ROWS_REJECTED);
    Lazy::force(&FINGERPRINT_CLAIMS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&JOB_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Record a job reaching a terminal status.
pub fn record_job(status: &str) {
    JOBS_PROCESSED.with_label_values(&[status]).inc();
}

/// Record one classified row.
pub fn record_row_outcome(status: &str) {
    ROW_OUTCOMES.with_label_values(&[status]).inc();
}

/// Record one rejected row.
pub fn record_row_rejected(reason: &str) {
    ROWS_REJECTED.with_label_values(&[reason]).inc();
}

/// Record a fingerprint claim decision.
pub fn record_claim_decision(decision: &str) {
    FINGERPRINT_CLAIMS.with_label_values(&[decision]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
