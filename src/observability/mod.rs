//! Observability for the product service
//!
//! Bootstraps distributed tracing, Prometheus metrics and trace-correlated
//! logging once per process, and tears them down in reverse order:
//! - `init`: [`setup`] / [`TelemetryBuilder`] and the [`TelemetryHandle`]
//! - `traces`: export backends and W3C context propagation
//! - `recorder`, `metrics`, `endpoint`: the metrics registry and scrape listener
//! - `logging`: the correlated logger
//! - `sampler`: background runtime statistics
//! - `shutdown`: the ordered, bounded shutdown stack

pub mod endpoint;
pub mod init;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod sampler;
pub mod shutdown;
pub mod traces;

pub use endpoint::{metrics_router, MetricsServer};
pub use init::{setup, TelemetryBuilder, TelemetryHandle};
pub use logging::{trace_ids, CorrelatedLogger};
pub use recorder::{extract_client_ip, MetricsRegistry};
pub use sampler::RuntimeSampler;
pub use shutdown::{ShutdownFn, ShutdownStack};
pub use traces::{
    backend_for, extract_trace_context, flush_provider, NoopBackend,
    OtlpBackend, TraceBackend,
};
