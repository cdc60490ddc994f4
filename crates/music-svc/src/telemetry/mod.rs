//! OpenTelemetry instrumentation: traces, metrics, and structured logs.
//!
//! Spans and measurements are exported over OTLP/gRPC to the collector
//! configured by `OTEL_EXPORTER_OTLP_ENDPOINT`.
//!
//! # Telemetry invariants
//!
//! - Instrumentation is transparent: wrapped operations return exactly what
//!   they would have returned uninstrumented, and no telemetry failure after
//!   startup reaches a caller.
//! - Every span opened by a wrapper is ended exactly once, on every exit path.
//! - Once [`TelemetryPipeline::shutdown`] begins, no new span or measurement
//!   is accepted.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod handle;
pub mod init;
pub mod instruments;
pub mod memory;
mod propagation;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::{SpanScope, TelemetryHandle};
pub use init::{init_logging, ShutdownOutcome, TelemetryPipeline, TelemetrySettings};
pub use instruments::{InstrumentRegistry, PROCESS_MEMORY_BYTES, QUERY_DURATION, REQUEST_DURATION};
