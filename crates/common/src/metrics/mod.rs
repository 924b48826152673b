//! Metrics and observability utilities
//!
//! Provides metric registration and record helpers with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all StudyForge metrics
pub const METRICS_PREFIX: &str = "studyforge";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answered questions"
    );

    describe_histogram!(
        format!("{}_answer_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end answer latency in seconds"
    );

    describe_counter!(
        format!("{}_web_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Times the web-search fallback was invoked"
    );

    describe_counter!(
        format!("{}_llm_retries_total", METRICS_PREFIX),
        Unit::Count,
        "LLM transient-failure retries"
    );

    describe_gauge!(
        format!("{}_evidence_count", METRICS_PREFIX),
        Unit::Count,
        "Evidence items passed to the synthesizer"
    );
}

/// Record a completed answer request
pub fn record_answer(duration_secs: f64, retrieval_mode: &str, evidence_count: usize) {
    counter!(
        format!("{}_answers_total", METRICS_PREFIX),
        "mode" => retrieval_mode.to_string()
    )
    .increment(1);

    histogram!(format!("{}_answer_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_evidence_count", METRICS_PREFIX)).set(evidence_count as f64);
}

/// Record a web-search fallback invocation
pub fn record_web_fallback() {
    counter!(format!("{}_web_fallbacks_total", METRICS_PREFIX)).increment(1);
}
