//! In-memory telemetry for unit tests.

use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::metrics::data::{Gauge, Histogram};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::testing::metrics::InMemoryMetricsExporter;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;

use super::{TelemetryHandle, TelemetryPipeline};

/// Span exporter that keeps every exported batch, including across
/// exporter shutdown, so tests can inspect what a final flush delivered.
#[derive(Clone, Debug, Default)]
pub(crate) struct RetainingSpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl RetainingSpanExporter {
    pub fn exported(&self) -> Vec<SpanData> {
        self.spans.lock().expect("exported spans lock").clone()
    }
}

impl SpanExporter for RetainingSpanExporter {
    fn export(
        &mut self,
        batch: Vec<SpanData>,
    ) -> Pin<Box<dyn Future<Output = ExportResult> + Send + 'static>> {
        self.spans
            .lock()
            .expect("exported spans lock")
            .extend(batch);
        Box::pin(ready(Ok(())))
    }
}

/// One exported histogram data point: sample count and rendered label set.
pub(crate) struct HistogramPoint {
    pub count: u64,
    pub labels: String,
}

impl HistogramPoint {
    /// `true` if the label set contains `key` with exactly the rendered
    /// `value` (e.g. `Bool(true)`, `String(Static("GET"))`).
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.contains(&format!("\"{key}\"")) && self.labels.contains(value)
    }
}

/// Handle wired to synchronous in-memory span and metric exporters.
pub(crate) struct TestTelemetry {
    pub handle: TelemetryHandle,
    spans: InMemorySpanExporter,
    metrics: InMemoryMetricsExporter,
    tracer_provider: TracerProvider,
    meter_provider: SdkMeterProvider,
    pipeline: Option<TelemetryPipeline>,
}

impl TestTelemetry {
    /// Must be called inside a multi-threaded Tokio runtime: metric flushes
    /// block until the periodic reader task answers.
    pub fn new() -> Self {
        let spans = InMemorySpanExporter::default();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(spans.clone())
            .build();

        let metrics = InMemoryMetricsExporter::default();
        let reader = PeriodicReader::builder(metrics.clone(), runtime::Tokio)
            .with_interval(Duration::from_secs(3600))
            .build();
        let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();

        let (handle, pipeline) =
            TelemetryPipeline::from_providers(tracer_provider.clone(), meter_provider.clone());
        Self {
            handle,
            spans,
            metrics,
            tracer_provider,
            meter_provider,
            pipeline: Some(pipeline),
        }
    }

    /// Take ownership of the pipeline, e.g. to shut it down.
    pub fn pipeline(&mut self) -> TelemetryPipeline {
        self.pipeline.take().expect("pipeline already taken")
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.tracer_provider.force_flush();
        self.spans.get_finished_spans().expect("finished spans")
    }

    /// Data points currently held by the histogram exported as `name`.
    pub fn histogram_points(&self, name: &str) -> Vec<HistogramPoint> {
        self.collect(|metric, points| {
            if metric.name != name {
                return;
            }
            if let Some(hist) = metric.data.as_any().downcast_ref::<Histogram<f64>>() {
                points.extend(hist.data_points.iter().map(|dp| HistogramPoint {
                    count: dp.count,
                    labels: format!("{:?}", dp.attributes),
                }));
            }
        })
    }

    /// Values currently reported by the u64 gauge exported as `name`.
    pub fn gauge_values(&self, name: &str) -> Vec<u64> {
        self.collect(|metric, values| {
            if metric.name != name {
                return;
            }
            if let Some(gauge) = metric.data.as_any().downcast_ref::<Gauge<u64>>() {
                values.extend(gauge.data_points.iter().map(|dp| dp.value));
            }
        })
    }

    fn collect<T>(
        &self,
        mut visit: impl FnMut(&opentelemetry_sdk::metrics::data::Metric, &mut Vec<T>),
    ) -> Vec<T> {
        self.metrics.reset();
        self.meter_provider.force_flush().expect("flush metrics");
        let mut out = Vec::new();
        for resource_metrics in self.metrics.get_finished_metrics().expect("finished metrics") {
            for scope in &resource_metrics.scope_metrics {
                for metric in &scope.metrics {
                    visit(metric, &mut out);
                }
            }
        }
        out
    }
}
