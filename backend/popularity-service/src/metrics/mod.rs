//! Popularity Job Metrics
//!
//! Prometheus metrics for the recompute jobs, exposed on `/metrics`

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use std::time::Duration;

use crate::models::EntityClass;

static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "popularity_runs_total",
        "Total recompute runs per class (success/error/skipped)",
        &["class", "status"]
    )
    .expect("Failed to register popularity runs metric")
});

static RUN_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "popularity_run_duration_seconds",
        "Duration of full recompute runs",
        &["class"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
    )
    .expect("Failed to register popularity run duration metric")
});

static ENTITIES_RANKED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "popularity_entities_ranked",
        "Entities ranked by the last completed run",
        &["class"]
    )
    .expect("Failed to register popularity entities ranked metric")
});

static WRITE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "popularity_write_errors_total",
        "Ranking writes that failed after retries",
        &["class"]
    )
    .expect("Failed to register popularity write errors metric")
});

/// Record run result (success/error/skipped)
pub fn record_run(class: EntityClass, status: &str) {
    RUNS_TOTAL.with_label_values(&[class.as_str(), status]).inc();
}

pub fn record_run_duration(class: EntityClass, duration: Duration) {
    RUN_DURATION_SECONDS
        .with_label_values(&[class.as_str()])
        .observe(duration.as_secs_f64());
}

pub fn set_entities_ranked(class: EntityClass, count: usize) {
    ENTITIES_RANKED
        .with_label_values(&[class.as_str()])
        .set(count as i64);
}

pub fn record_write_errors(class: EntityClass, count: usize) {
    if count > 0 {
        WRITE_ERRORS_TOTAL
            .with_label_values(&[class.as_str()])
            .inc_by(count as u64);
    }
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
