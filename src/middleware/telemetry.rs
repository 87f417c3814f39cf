//! Request instrumentation
//!
//! Every request passing through [`telemetry_middleware`] gets one server
//! span, one counter increment and one latency observation labeled with the
//! final status, a pair of active-request gauge deltas and two correlated log
//! lines. The bookkeeping lives in [`InFlightRequest`], whose `Drop` closes
//! the books even when the handler panics or the request future is dropped.
//!
//! Responses that declare their size are recorded as soon as the handler
//! returns. Streamed bodies are counted as they are written, and the request
//! is recorded once the body is finished or dropped.

use std::time::{Duration, Instant};

use axum::{
    body::{Body, HttpBody},
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use crate::observability::metrics::endpoint_label;
use crate::observability::{extract_client_ip, extract_trace_context, TelemetryHandle};

use super::request_id::RequestId;

/// Trace context of the current request, readable by handlers through
/// `Extension<RequestContext>`.
#[derive(Clone, Debug)]
pub struct RequestContext(pub Context);

impl RequestContext {
    pub fn context(&self) -> &Context {
        &self.0
    }
}

pub async fn telemetry_middleware(
    State(telemetry): State<TelemetryHandle>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = endpoint_label(
        request.extensions().get::<MatchedPath>().map(MatchedPath::as_str),
        &path,
    );

    let parent = extract_trace_context(request.headers());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let mut attributes = vec![
        KeyValue::new("http.method", method.clone()),
        KeyValue::new("http.url", request.uri().to_string()),
        KeyValue::new("http.client_ip", extract_client_ip(&request)),
        KeyValue::new("http.user_agent", user_agent),
    ];
    if let Some(request_id) = request.extensions().get::<RequestId>() {
        attributes.push(KeyValue::new("http.request_id", request_id.0.clone()));
    }

    let cx = telemetry.start_span(&parent, path.clone(), SpanKind::Server, attributes);
    request.extensions_mut().insert(RequestContext(cx.clone()));

    let mut in_flight = InFlightRequest::begin(telemetry, cx, method, path, endpoint);
    let response = next.run(request).await;

    match ResponseRecorder::observe(&response) {
        Some(observed) => {
            in_flight.finish(observed);
            response
        }
        None => meter_body(response, in_flight),
    }
}

/// Defer recording until the streamed body has been written out.
fn meter_body(response: Response, in_flight: InFlightRequest) -> Response {
    let mut meter = BodyMeter {
        recorder: ResponseRecorder::new(response.status()),
        in_flight,
    };
    response.map(|body| {
        Body::new(body.map_frame(move |frame| {
            if let Some(data) = frame.data_ref() {
                meter.recorder.add_bytes(data.len() as u64);
            }
            frame
        }))
    })
}

/// Travels with a streamed body; dropping the body records the request.
struct BodyMeter {
    recorder: ResponseRecorder,
    in_flight: InFlightRequest,
}

impl Drop for BodyMeter {
    fn drop(&mut self) {
        self.in_flight.finish(self.recorder);
    }
}

/// What the client was sent: final status and body size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseRecorder {
    status: StatusCode,
    bytes: u64,
}

impl ResponseRecorder {
    pub fn new(status: StatusCode) -> Self {
        Self { status, bytes: 0 }
    }

    /// Status and size of a response that declares its size up front, through
    /// `Content-Length` or an exact body size hint. `None` for streamed bodies.
    pub fn observe(response: &Response) -> Option<Self> {
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or_else(|| response.body().size_hint().exact())
            .map(|bytes| Self {
                status: response.status(),
                bytes,
            })
    }

    /// Outcome recorded for a request whose handler never produced a response.
    pub fn unfinished() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.bytes += n;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Per-request instrumentation state.
///
/// Holds one unit of the active-request gauge from `begin` until drop; the
/// gauge decrement and the span end are the last two things it does.
pub struct InFlightRequest {
    telemetry: TelemetryHandle,
    cx: Context,
    method: String,
    path: String,
    endpoint: String,
    started: Instant,
    finished: bool,
}

impl InFlightRequest {
    pub fn begin(
        telemetry: TelemetryHandle,
        cx: Context,
        method: String,
        path: String,
        endpoint: String,
    ) -> Self {
        telemetry.metrics().request_started();
        telemetry
            .logger()
            .info(&cx, format_args!("Request started: {method} {path}"));

        Self {
            telemetry,
            cx,
            method,
            path,
            endpoint,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(&mut self, observed: ResponseRecorder) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.record(observed, self.started.elapsed());
    }

    fn record(&self, observed: ResponseRecorder, elapsed: Duration) {
        let status = observed.status();
        let code = status.as_u16();

        self.telemetry
            .metrics()
            .record_request(&self.method, &self.endpoint, code, elapsed);

        let span = self.cx.span();
        span.set_attribute(KeyValue::new("http.status_code", i64::from(code)));
        span.set_attribute(KeyValue::new("http.response_size", observed.bytes() as i64));
        span.set_attribute(KeyValue::new("http.duration_seconds", elapsed.as_secs_f64()));
        span.add_event(
            "http.request.recorded",
            vec![
                KeyValue::new("http.status_code", i64::from(code)),
                KeyValue::new("http.duration_seconds", elapsed.as_secs_f64()),
                KeyValue::new("http.response_size", observed.bytes() as i64),
            ],
        );
        if code >= 400 {
            span.set_status(Status::error(status.canonical_reason().unwrap_or("Unknown")));
        } else {
            span.set_status(Status::Ok);
        }

        let line = format!(
            "Request completed: {} {} {} {} {:.6}s",
            self.method,
            self.path,
            code,
            observed.bytes(),
            elapsed.as_secs_f64()
        );
        let logger = self.telemetry.logger();
        if status.is_server_error() {
            logger.error(&self.cx, line);
        } else if status.is_client_error() {
            logger.warn(&self.cx, line);
        } else {
            logger.info(&self.cx, line);
        }
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            self.record(ResponseRecorder::unfinished(), self.started.elapsed());
        }
        self.telemetry.metrics().request_finished();
        self.cx.span().end();
    }
}
