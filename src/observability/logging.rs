//! Trace-correlated structured logging
//!
//! The telemetry handle owns one `tracing` [`Dispatch`] built from the logging
//! settings. [`CorrelatedLogger`] writes through it and prefixes each message
//! with the ids of the sampled span found in the supplied context:
//!
//! ```text
//! [trace_id=4bf92f3577b34da6a3ce929d0e0e4736 span_id=00f067aa0ba902b7] Request started: GET /health
//! ```

use std::fmt::Display;

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use tracing::{Dispatch, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingSettings};
use crate::error::TelemetryError;

/// Build the log pipeline described by `settings`, writing to `writer`.
pub fn build_dispatch(
    settings: &LoggingSettings,
    writer: BoxMakeWriter,
    ansi: bool,
) -> Result<Dispatch, TelemetryError> {
    let level: LevelFilter = settings
        .level
        .parse()
        .map_err(|_| TelemetryError::LogLevel(settings.level.clone()))?;

    let registry = tracing_subscriber::registry().with(EnvFilter::default().add_directive(level.into()));

    let dispatch = match settings.format {
        LogFormat::Json => Dispatch::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_level(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(writer),
            ),
        ),
        LogFormat::Pretty => Dispatch::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_ansi(ansi)
                    .with_writer(writer),
            ),
        ),
    };

    Ok(dispatch)
}

/// Hex trace and span ids of the span in `cx`, if it is valid and sampled.
pub fn trace_ids(cx: &Context) -> Option<(String, String)> {
    let span = cx.span();
    let span_context = span.span_context();
    if span_context.is_valid() && span_context.is_sampled() {
        Some((
            format!("{:032x}", span_context.trace_id()),
            format!("{:016x}", span_context.span_id()),
        ))
    } else {
        None
    }
}

/// `[trace_id=.. span_id=..] message`, or the bare message without ids.
fn prefixed(ids: Option<&(String, String)>, message: impl Display) -> String {
    match ids {
        Some((trace_id, span_id)) => format!("[trace_id={trace_id} span_id={span_id}] {message}"),
        None => message.to_string(),
    }
}

#[derive(Clone)]
pub struct CorrelatedLogger {
    dispatch: Dispatch,
}

impl CorrelatedLogger {
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    pub fn info(&self, cx: &Context, message: impl Display) {
        self.emit(Level::INFO, cx, message);
    }

    pub fn warn(&self, cx: &Context, message: impl Display) {
        self.emit(Level::WARN, cx, message);
    }

    pub fn error(&self, cx: &Context, message: impl Display) {
        self.emit(Level::ERROR, cx, message);
    }

    fn emit(&self, level: Level, cx: &Context, message: impl Display) {
        let ids = trace_ids(cx);
        let line = prefixed(ids.as_ref(), message);
        let trace_id = ids.as_ref().map(|(t, _)| t.as_str());
        let span_id = ids.as_ref().map(|(_, s)| s.as_str());

        tracing::dispatcher::with_default(&self.dispatch, || {
            if level == Level::ERROR {
                tracing::error!(trace_id, span_id, "{line}");
            } else if level == Level::WARN {
                tracing::warn!(trace_id, span_id, "{line}");
            } else {
                tracing::info!(trace_id, span_id, "{line}");
            }
        });
    }
}
