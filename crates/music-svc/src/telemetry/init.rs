//! OTEL SDK initialisation and shutdown: structured logs, OTLP span and
//! metric export, and the [`TelemetryHandle`] handed to the instrumentation
//! wrappers.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporterBuilder, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::handle::TelemetryHandle;
use super::instruments::InstrumentRegistry;

/// Instrumentation scope name for every span and instrument of the service.
const SCOPE_NAME: &str = "music-svc";

/// Everything [`TelemetryPipeline::init`] needs, supplied once at startup.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Collector address, `host:port` or a full `http(s)://` URI.
    pub endpoint: String,
    pub service_name: String,
    pub service_version: String,
    /// `deployment.environment` resource attribute (e.g. `local`, `prod`).
    pub deployment_environment: String,
    /// How often accumulated measurements are exported.
    pub metric_export_interval: Duration,
    /// Per-request timeout for a single export call.
    pub export_timeout: Duration,
}

/// How [`TelemetryPipeline::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Everything flushed and both providers closed cleanly.
    Clean,
    /// Shutdown finished but at least one flush or close failed.
    Degraded,
    /// The deadline elapsed before shutdown finished.
    TimedOut,
}

/// Initialise the global tracing subscriber for structured log output.
///
/// `RUST_LOG` overrides `log_level`. `format` is `"json"` (default) or
/// `"text"`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_logging(log_level: &str, format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        "text" => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    }
    .context("failed to initialise tracing subscriber")
}

/// Process-wide owner of the span and metric export pipelines.
///
/// Spans are buffered by a batch processor and metrics by a periodic reader,
/// both running on the Tokio runtime, so a slow or unreachable collector
/// delays export but never the request path.
pub struct TelemetryPipeline {
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    closed: Arc<AtomicBool>,
}

impl TelemetryPipeline {
    /// Connect the OTLP/gRPC exporters and register the canonical instruments.
    ///
    /// Must be called from within the Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or either exporter cannot
    /// be constructed. Callers treat this as fatal.
    pub fn init(settings: &TelemetrySettings) -> Result<(TelemetryHandle, Self)> {
        let endpoint = normalise_endpoint(&settings.endpoint);
        let resource = service_resource(settings);

        if let Err(e) = opentelemetry::global::set_error_handler(|err| {
            warn!(error = %err, "telemetry export error");
        }) {
            warn!(error = %e, "failed to install telemetry error handler");
        }

        // --- Traces ---
        let span_exporter = SpanExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.clone())
                .with_timeout(settings.export_timeout),
        )
        .build_span_exporter()
        .context("failed to build OTLP span exporter")?;

        let tracer_provider = TracerProvider::builder()
            .with_batch_exporter(span_exporter, runtime::Tokio)
            .with_config(sdktrace::Config::default().with_resource(resource.clone()))
            .build();

        // --- Metrics ---
        let meter_provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone())
                    .with_timeout(settings.export_timeout),
            )
            .with_resource(resource)
            .with_period(settings.metric_export_interval)
            .build()
            .context("failed to install OTLP metrics pipeline")?;

        info!(
            endpoint = %endpoint,
            service.name = %settings.service_name,
            service.version = %settings.service_version,
            deployment.environment = %settings.deployment_environment,
            "telemetry pipeline initialised"
        );

        Ok(Self::from_providers(tracer_provider, meter_provider))
    }

    /// Wire a handle and pipeline over already-built providers.
    pub fn from_providers(
        tracer_provider: TracerProvider,
        meter_provider: SdkMeterProvider,
    ) -> (TelemetryHandle, Self) {
        let closed = Arc::new(AtomicBool::new(false));
        let tracer = tracer_provider.tracer(SCOPE_NAME);
        let meter = meter_provider.meter(SCOPE_NAME);
        let instruments = InstrumentRegistry::register(&meter, Arc::clone(&closed));

        let pipeline = Self {
            tracer_provider,
            meter_provider,
            closed,
        };
        (TelemetryHandle::new(tracer, instruments), pipeline)
    }

    /// Stop accepting telemetry, flush everything buffered, and close the
    /// exporters, giving up after `deadline`.
    ///
    /// Failures are logged and never returned; the caller can always proceed
    /// to exit.
    pub async fn shutdown(self, deadline: Duration) -> ShutdownOutcome {
        self.closed.store(true, Ordering::Release);
        let Self {
            tracer_provider,
            meter_provider,
            ..
        } = self;

        // Flushing blocks on the exporters, so keep it off the async workers.
        let work = tokio::task::spawn_blocking(move || {
            let mut clean = true;
            for result in tracer_provider.force_flush() {
                if let Err(e) = result {
                    warn!(error = %e, "failed to flush spans during shutdown");
                    clean = false;
                }
            }
            drop(tracer_provider);

            if let Err(e) = meter_provider.shutdown() {
                warn!(error = %e, "failed to shut down meter provider");
                clean = false;
            }
            clean
        });

        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(true)) => {
                info!("telemetry pipeline shut down");
                ShutdownOutcome::Clean
            }
            Ok(Ok(false)) => ShutdownOutcome::Degraded,
            Ok(Err(e)) => {
                warn!(error = %e, "telemetry shutdown task failed");
                ShutdownOutcome::Degraded
            }
            Err(_) => {
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "telemetry shutdown exceeded deadline; buffered data may be lost"
                );
                ShutdownOutcome::TimedOut
            }
        }
    }
}

fn service_resource(settings: &TelemetrySettings) -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            settings.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            settings.service_version.clone(),
        ),
        KeyValue::new(
            "deployment.environment",
            settings.deployment_environment.clone(),
        ),
    ])
}

/// Tonic needs a URI; accept the bare `host:port` form as plaintext HTTP/2.
fn normalise_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::{RetainingSpanExporter, TestTelemetry};
    use opentelemetry::trace::SpanKind;
    use opentelemetry::Context as OtelContext;

    #[test]
    fn endpoint_without_scheme_gets_http() {
        assert_eq!(normalise_endpoint("0.0.0.0:4317"), "http://0.0.0.0:4317");
        assert_eq!(
            normalise_endpoint(" https://collector:4317 "),
            "https://collector:4317"
        );
    }

    fn settings(endpoint: &str) -> TelemetrySettings {
        TelemetrySettings {
            endpoint: endpoint.into(),
            service_name: "music-svc".into(),
            service_version: "1.2.3".into(),
            deployment_environment: "staging".into(),
            metric_export_interval: Duration::from_secs(10),
            export_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn resource_carries_service_identity() {
        let resource = service_resource(&settings("127.0.0.1:4317"));
        let get = |key: &'static str| {
            resource
                .get(opentelemetry::Key::from_static_str(key))
                .map(|v| v.to_string())
        };
        assert_eq!(
            get(opentelemetry_semantic_conventions::resource::SERVICE_NAME).as_deref(),
            Some("music-svc")
        );
        assert_eq!(
            get(opentelemetry_semantic_conventions::resource::SERVICE_VERSION).as_deref(),
            Some("1.2.3")
        );
        assert_eq!(get("deployment.environment").as_deref(), Some("staging"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_flushes_batched_spans() {
        let exporter = RetainingSpanExporter::default();
        let tracer_provider = TracerProvider::builder()
            .with_batch_exporter(exporter.clone(), runtime::Tokio)
            .build();
        let (handle, pipeline) =
            TelemetryPipeline::from_providers(tracer_provider, SdkMeterProvider::builder().build());

        for name in ["first", "second", "third"] {
            handle
                .start_span(name, SpanKind::Internal, &OtelContext::new(), vec![])
                .finish();
        }

        let outcome = pipeline.shutdown(Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
        let names: Vec<_> = exporter
            .exported()
            .into_iter()
            .map(|span| span.name.into_owned())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_is_accepted_after_shutdown() {
        let mut t = TestTelemetry::new();
        let (handle, pipeline) = (t.handle.clone(), t.pipeline());
        pipeline.shutdown(Duration::from_secs(5)).await;

        assert!(!handle.is_accepting());
        let scope = handle.start_span("late", SpanKind::Internal, &OtelContext::new(), vec![]);
        assert!(!scope.is_recording());
        scope.finish();
        assert!(!handle
            .instruments()
            .histogram(crate::telemetry::QUERY_DURATION)
            .is_enabled());
        assert!(t.finished_spans().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_returns_when_deadline_is_exceeded() {
        let mut t = TestTelemetry::new();
        let pipeline = t.pipeline();
        let bounded = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.shutdown(Duration::ZERO),
        )
        .await;
        assert!(bounded.is_ok(), "shutdown must always return");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_collector_still_initialises() {
        let (handle, pipeline) = TelemetryPipeline::init(&settings("127.0.0.1:1")).unwrap();
        handle
            .start_span("orphan", SpanKind::Internal, &OtelContext::new(), vec![])
            .finish();

        let bounded = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.shutdown(Duration::from_secs(1)),
        )
        .await;
        assert!(bounded.is_ok());
    }
}
