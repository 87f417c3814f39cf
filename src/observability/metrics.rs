//! Metric names and descriptions
//!
//! Names are stable: dashboards and alerts depend on them.

use metrics::{Recorder, Unit};

/// Counter of completed HTTP requests, labeled by method, endpoint and status.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Histogram of request latency in seconds, same labels as the counter.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Up/down gauge of requests currently inside the middleware.
pub const ACTIVE_REQUESTS: &str = "active_requests";

/// Resident set size of the process, refreshed by the runtime sampler.
pub const PROCESS_MEMORY_RESIDENT_BYTES: &str = "process_memory_resident_bytes";

pub const LABEL_METHOD: &str = "method";
pub const LABEL_ENDPOINT: &str = "endpoint";
pub const LABEL_STATUS: &str = "status";

/// Prometheus client default latency buckets, in seconds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Attach help text and units to every instrument the registry owns.
pub fn describe_all<R: Recorder + ?Sized>(recorder: &R) {
    recorder.describe_counter(
        HTTP_REQUESTS_TOTAL.into(),
        None,
        "Total number of HTTP requests".into(),
    );
    recorder.describe_histogram(
        HTTP_REQUEST_DURATION_SECONDS.into(),
        Some(Unit::Seconds),
        "HTTP request latency in seconds".into(),
    );
    recorder.describe_gauge(
        ACTIVE_REQUESTS.into(),
        None,
        "Number of requests currently being processed".into(),
    );
    recorder.describe_gauge(
        PROCESS_MEMORY_RESIDENT_BYTES.into(),
        Some(Unit::Bytes),
        "Resident memory of the process in bytes".into(),
    );
}

/// Route label for a request: the matched route template when the router
/// knows it, otherwise the raw path.
pub fn endpoint_label(matched: Option<&str>, raw_path: &str) -> String {
    match matched {
        Some(template) if !template.is_empty() => template.to_string(),
        _ => raw_path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_buckets_are_sorted() {
        assert!(DEFAULT_BUCKETS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(DEFAULT_BUCKETS.first(), Some(&0.005));
        assert_eq!(DEFAULT_BUCKETS.last(), Some(&10.0));
    }

    #[test]
    fn test_endpoint_label_prefers_template() {
        assert_eq!(
            endpoint_label(Some("/api/products/{id}"), "/api/products/42"),
            "/api/products/{id}"
        );
        assert_eq!(endpoint_label(None, "/nowhere"), "/nowhere");
        assert_eq!(endpoint_label(Some(""), "/health"), "/health");
    }
}
