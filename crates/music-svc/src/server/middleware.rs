//! Axum middleware applied to the router.
//!
//! [`instrument_request`] opens one server span per request, carries its
//! context into the handler, and records request latency and resident
//! memory when the handler returns. Log events emitted by the handler carry
//! the request's `trace_id` and `span_id`.

use std::convert::Infallible;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use axum::async_trait;
use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use tracing::field::{display, Empty};
use tracing::Instrument;

use crate::telemetry::{memory, TelemetryHandle, PROCESS_MEMORY_BYTES, REQUEST_DURATION};

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Middleware state: the telemetry handle plus the span name for the routes
/// it wraps.
#[derive(Clone)]
pub struct RequestTelemetry {
    handle: TelemetryHandle,
    operation: &'static str,
}

impl RequestTelemetry {
    pub fn new(handle: TelemetryHandle, operation: &'static str) -> Self {
        Self { handle, operation }
    }
}

/// Trace context of the current request's server span.
///
/// Handlers behind [`instrument_request`] pass this to data-access calls so
/// their spans become children of the request span. On uninstrumented routes
/// it is an empty context.
#[derive(Clone, Debug, Default)]
pub struct RequestContext(pub Context);

impl RequestContext {
    pub fn context(&self) -> &Context {
        &self.0
    }

    /// Attach a handler-level failure to the request span.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        let span = self.0.span();
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Wrap one request in a server span and record its metrics.
///
/// Install with `route_layer(from_fn_with_state(RequestTelemetry::new(..), instrument_request))`
/// so the matched route template is available for the `route` label.
pub async fn instrument_request(
    State(telemetry): State<RequestTelemetry>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let parent = telemetry.handle.extract_context(req.headers());
    let scope = telemetry.handle.start_span(
        telemetry.operation,
        SpanKind::Server,
        &parent,
        vec![
            KeyValue::new("http.method", method.clone()),
            KeyValue::new("http.url", req.uri().to_string()),
            KeyValue::new("http.route", route.clone()),
        ],
    );
    req.extensions_mut()
        .insert(RequestContext(scope.context().clone()));

    let handler = next
        .run(req)
        .with_context(scope.context().clone())
        .instrument(log_span(telemetry.operation, scope.context()));
    let response = match catch_panic(handler).await {
        Ok(response) => response,
        Err(panic) => {
            scope.panicked();
            resume_unwind(panic);
        }
    };

    let status = response.status();
    scope.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
    if status.is_server_error() {
        scope.set_error_status(format!("HTTP {}", status.as_u16()));
    }

    let instruments = telemetry.handle.instruments();
    instruments.histogram(REQUEST_DURATION).record(
        start.elapsed().as_secs_f64(),
        &[KeyValue::new("method", method), KeyValue::new("route", route)],
    );
    if let Some(bytes) = memory::resident_bytes() {
        instruments.gauge(PROCESS_MEMORY_BYTES).record(bytes);
    }

    scope.finish();
    response
}

/// `tracing` span for the handler's log events, tagged with the identifiers
/// of the request's trace span so log lines can be joined to the trace.
fn log_span(operation: &'static str, cx: &Context) -> tracing::Span {
    let span = tracing::info_span!("request", operation, trace_id = Empty, span_id = Empty);
    let otel_span = cx.span();
    let span_cx = otel_span.span_context();
    if span_cx.is_valid() {
        span.record("trace_id", display(span_cx.trace_id()));
        span.record("span_id", display(span_cx.span_id()));
    }
    span
}

/// Poll `fut`, returning a panic from any poll as `Err` instead of unwinding.
async fn catch_panic<F: Future>(fut: F) -> std::thread::Result<F::Output> {
    let mut fut = Box::pin(fut);
    std::future::poll_fn(|cx| match catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(cx))) {
        Ok(poll) => poll.map(Ok),
        Err(panic) => std::task::Poll::Ready(Err(panic)),
    })
    .await
}
