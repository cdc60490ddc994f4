//! [`TelemetryHandle`]: the tracer, instruments, and propagator injected into
//! every instrumentation wrapper, plus [`SpanScope`] for scoped span ownership.

use std::borrow::Cow;
use std::sync::Arc;

use axum::http::HeaderMap;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, TraceId, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Tracer;

use super::instruments::InstrumentRegistry;
use super::propagation::HeaderExtractor;

/// Cheaply cloneable access to the process telemetry pipeline.
///
/// One handle is built by [`TelemetryPipeline`](super::TelemetryPipeline)
/// and cloned into the data-access and request wrappers; nothing on the
/// request path consults global OpenTelemetry state.
#[derive(Clone)]
pub struct TelemetryHandle {
    tracer: Tracer,
    instruments: Arc<InstrumentRegistry>,
    propagator: TraceContextPropagator,
}

impl TelemetryHandle {
    pub(crate) fn new(tracer: Tracer, instruments: InstrumentRegistry) -> Self {
        Self {
            tracer,
            instruments: Arc::new(instruments),
            propagator: TraceContextPropagator::new(),
        }
    }

    /// The canonical instrument registry.
    pub fn instruments(&self) -> &InstrumentRegistry {
        &self.instruments
    }

    /// Returns `false` once the pipeline has begun shutting down.
    pub fn is_accepting(&self) -> bool {
        !self.instruments.is_closed()
    }

    /// Open a span under `parent` and return the scope that owns it.
    ///
    /// After shutdown has begun no span is created; the returned scope is
    /// non-recording and carries `parent` unchanged.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
        attributes: Vec<KeyValue>,
    ) -> SpanScope {
        if !self.is_accepting() {
            return SpanScope::inert(parent.clone());
        }
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        SpanScope {
            cx: parent.with_span(span),
            recording: true,
            finished: false,
        }
    }

    /// Parent context carried by inbound `traceparent`/`tracestate` headers.
    ///
    /// Returns an empty context (new root trace) when the headers are absent
    /// or malformed.
    pub fn extract_context(&self, headers: &HeaderMap) -> Context {
        self.propagator.extract(&HeaderExtractor(headers))
    }
}

/// Owns one open span for the duration of a wrapped operation.
///
/// The span is ended exactly once: by [`SpanScope::finish`] on the normal
/// path, otherwise when the scope is dropped. A scope dropped without
/// `finish` (panic unwinding, cancelled future) marks its span with
/// `otel.abandoned` and an error status before ending it.
#[must_use = "dropping a SpanScope ends its span immediately"]
pub struct SpanScope {
    cx: Context,
    recording: bool,
    finished: bool,
}

impl SpanScope {
    fn inert(cx: Context) -> Self {
        Self {
            cx,
            recording: false,
            finished: false,
        }
    }

    /// Context carrying this scope's span; pass it to nested operations.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Trace id of this scope's span (or of the parent, when inert).
    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    /// Returns `true` if this scope owns a live span.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        if self.recording {
            self.cx.span().set_attribute(attribute);
        }
    }

    /// Attach `err` to the span as an exception event and set error status.
    pub fn record_error(&self, err: &dyn std::error::Error) {
        if self.recording {
            let span = self.cx.span();
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
    }

    pub fn set_error_status(&self, description: impl Into<Cow<'static, str>>) {
        if self.recording {
            self.cx.span().set_status(Status::error(description));
        }
    }

    /// End the span on the normal completion path.
    pub fn finish(mut self) {
        self.finished = true;
    }

    /// End the span for an operation whose panic was caught by the caller.
    ///
    /// Use this when the panic is about to be resumed: a caught panic is no
    /// longer in flight when the scope is eventually dropped.
    pub fn panicked(mut self) {
        self.mark_abandoned("panicked");
        self.finished = true;
    }

    fn mark_abandoned(&self, reason: &'static str) {
        if self.recording {
            let span = self.cx.span();
            span.set_attribute(KeyValue::new("otel.abandoned", reason));
            span.set_status(Status::error(format!("operation {reason} before completion")));
        }
    }
}

impl Drop for SpanScope {
    fn drop(&mut self) {
        if !self.recording {
            return;
        }
        if !self.finished {
            self.mark_abandoned(if std::thread::panicking() {
                "panicked"
            } else {
                "cancelled"
            });
        }
        self.cx.span().end();
    }
}
