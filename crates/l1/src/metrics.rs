use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec,
};

static L1_REQ_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static L1_COMMIT_LATENCY: OnceCell<HistogramVec> = OnceCell::new();

pub(crate) fn install_l1_metrics() {
    let _ = L1_REQ_TOTAL.set(
        register_int_counter_vec!(
            "provena_l1_requests_total",
            "Total HTTP requests served by the L1 surface",
            &["route", "result"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = L1_COMMIT_LATENCY.set(
        register_histogram_vec!(
            "provena_l1_commit_duration_seconds",
            "Latency of the commit pipeline (seconds)",
            &["result"],
            exponential_buckets(0.001, 2.0, 15).expect("buckets")
        )
        .expect("register_histogram_vec"),
    );
}

pub(crate) fn observe_request(route: &str, result: &str) {
    if let Some(counter) = L1_REQ_TOTAL.get() {
        counter.with_label_values(&[route, result]).inc();
    }
}

pub(crate) fn observe_commit(result: &str, seconds: f64) {
    if let Some(histogram) = L1_COMMIT_LATENCY.get() {
        histogram.with_label_values(&[result]).observe(seconds);
    }
}

pub(crate) async fn metrics_handler() -> ([(axum::http::HeaderName, String); 1], axum::body::Bytes)
{
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(error = %e, "Failed to encode prometheus metrics");
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            encoder.format_type().to_string(),
        )],
        buf.into(),
    )
}
