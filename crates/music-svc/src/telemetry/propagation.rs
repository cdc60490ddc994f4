//! W3C Trace Context propagation over HTTP headers.
//!
//! Adapter letting a [`TextMapPropagator`](opentelemetry::propagation::TextMapPropagator)
//! read `traceparent`/`tracestate` from inbound requests.

use axum::http::{HeaderMap, HeaderName};
use opentelemetry::propagation::Extractor;

/// Extractor for reading trace headers from an inbound [`HeaderMap`].
pub(crate) struct HeaderExtractor<'a>(pub(crate) &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}
