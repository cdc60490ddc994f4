//! [`InstrumentRegistry`]: the canonical measurement instruments, created once.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use opentelemetry::metrics::{Histogram, Meter, ObservableGauge, Unit};
use opentelemetry::KeyValue;
use tracing::warn;

/// Registry name of the inbound request latency histogram.
pub const REQUEST_DURATION: &str = "request_duration";
/// Registry name of the data-access latency histogram.
pub const QUERY_DURATION: &str = "query_duration";
/// Registry name of the resident memory gauge.
pub const PROCESS_MEMORY_BYTES: &str = "process_memory_bytes";

/// Latency histogram in seconds. Recording on an unset histogram is a no-op.
#[derive(Clone, Default)]
pub struct DurationHistogram {
    inner: Option<Histogram<f64>>,
}

impl DurationHistogram {
    fn new(histogram: Histogram<f64>) -> Self {
        Self {
            inner: Some(histogram),
        }
    }

    /// Record one duration with the given label set.
    pub fn record(&self, seconds: f64, labels: &[KeyValue]) {
        if let Some(histogram) = &self.inner {
            histogram.record(seconds, labels);
        }
    }

    /// Returns `true` if this histogram is backed by a real instrument.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }
}

/// Point-in-time memory gauge.
///
/// Each [`MemoryGauge::record`] replaces the latest sample; the meter's
/// collection callback reports that sample labelled with the process id.
#[derive(Clone, Default)]
pub struct MemoryGauge {
    latest: Option<Arc<AtomicU64>>,
    _instrument: Option<ObservableGauge<u64>>,
}

impl MemoryGauge {
    /// Store a new resident-memory sample in bytes.
    pub fn record(&self, bytes: u64) {
        if let Some(latest) = &self.latest {
            latest.store(bytes, Ordering::Relaxed);
        }
    }

    /// Returns `true` if this gauge is backed by a real instrument.
    pub fn is_enabled(&self) -> bool {
        self.latest.is_some()
    }
}

/// The three canonical instruments, looked up by registry name.
///
/// Instruments that failed to initialise, unknown names, and every lookup
/// after the telemetry pipeline has started shutting down all resolve to a
/// no-op recorder, so call sites never need to check.
pub struct InstrumentRegistry {
    request_duration: DurationHistogram,
    query_duration: DurationHistogram,
    process_memory: MemoryGauge,
    noop_histogram: DurationHistogram,
    noop_gauge: MemoryGauge,
    closed: Arc<AtomicBool>,
}

impl InstrumentRegistry {
    /// Create every canonical instrument on `meter`.
    ///
    /// Creation failures are logged; the affected instrument stays unset.
    pub fn register(meter: &Meter, closed: Arc<AtomicBool>) -> Self {
        Self {
            request_duration: duration_histogram(
                meter,
                REQUEST_DURATION,
                "http_request_duration_seconds",
                "Duration of HTTP requests",
            ),
            query_duration: duration_histogram(
                meter,
                QUERY_DURATION,
                "db_query_duration_seconds",
                "Duration of database queries",
            ),
            process_memory: memory_gauge(meter),
            noop_histogram: DurationHistogram::default(),
            noop_gauge: MemoryGauge::default(),
            closed,
        }
    }

    /// A registry where every instrument is a no-op.
    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        Self {
            request_duration: DurationHistogram::default(),
            query_duration: DurationHistogram::default(),
            process_memory: MemoryGauge::default(),
            noop_histogram: DurationHistogram::default(),
            noop_gauge: MemoryGauge::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Look up a histogram by registry name.
    pub fn histogram(&self, name: &str) -> &DurationHistogram {
        if self.is_closed() {
            return &self.noop_histogram;
        }
        match name {
            REQUEST_DURATION => &self.request_duration,
            QUERY_DURATION => &self.query_duration,
            _ => &self.noop_histogram,
        }
    }

    /// Look up a gauge by registry name.
    pub fn gauge(&self, name: &str) -> &MemoryGauge {
        if self.is_closed() || name != PROCESS_MEMORY_BYTES {
            return &self.noop_gauge;
        }
        &self.process_memory
    }

    /// Returns `true` once the owning pipeline has begun shutting down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn duration_histogram(
    meter: &Meter,
    key: &'static str,
    export_name: &'static str,
    description: &'static str,
) -> DurationHistogram {
    match meter
        .f64_histogram(export_name)
        .with_description(description)
        .with_unit(Unit::new("s"))
        .try_init()
    {
        Ok(histogram) => DurationHistogram::new(histogram),
        Err(e) => {
            warn!(instrument = key, error = %e, "failed to create instrument; recordings will be skipped");
            DurationHistogram::default()
        }
    }
}

fn memory_gauge(meter: &Meter) -> MemoryGauge {
    let latest = Arc::new(AtomicU64::new(0));
    let observed = Arc::clone(&latest);
    let labels = [KeyValue::new("process.pid", std::process::id().to_string())];

    match meter
        .u64_observable_gauge("process_rss_bytes")
        .with_description("Process resident set size")
        .with_unit(Unit::new("By"))
        .with_callback(move |observer| {
            // 0 means no request has been sampled yet.
            let bytes = observed.load(Ordering::Relaxed);
            if bytes > 0 {
                observer.observe(bytes, &labels);
            }
        })
        .try_init()
    {
        Ok(gauge) => MemoryGauge {
            latest: Some(latest),
            _instrument: Some(gauge),
        },
        Err(e) => {
            warn!(instrument = PROCESS_MEMORY_BYTES, error = %e, "failed to create instrument; recordings will be skipped");
            MemoryGauge::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    #[test]
    fn noop_registry_accepts_recordings() {
        let registry = InstrumentRegistry::noop();
        let histogram = registry.histogram(QUERY_DURATION);
        assert!(!histogram.is_enabled());
        histogram.record(0.25, &[KeyValue::new("operation", "query")]);
        registry.gauge(PROCESS_MEMORY_BYTES).record(1024);
    }

    #[test]
    fn registered_instruments_resolve_by_name() {
        let provider = SdkMeterProvider::builder().build();
        let registry =
            InstrumentRegistry::register(&provider.meter("test"), Arc::new(AtomicBool::new(false)));
        assert!(registry.histogram(REQUEST_DURATION).is_enabled());
        assert!(registry.histogram(QUERY_DURATION).is_enabled());
        assert!(registry.gauge(PROCESS_MEMORY_BYTES).is_enabled());
    }

    #[test]
    fn unknown_names_resolve_to_noop() {
        let provider = SdkMeterProvider::builder().build();
        let registry =
            InstrumentRegistry::register(&provider.meter("test"), Arc::new(AtomicBool::new(false)));
        assert!(!registry.histogram("cache_hits").is_enabled());
        assert!(!registry.gauge(REQUEST_DURATION).is_enabled());
    }

    #[test]
    fn closed_registry_resolves_to_noop() {
        let provider = SdkMeterProvider::builder().build();
        let closed = Arc::new(AtomicBool::new(false));
        let registry = InstrumentRegistry::register(&provider.meter("test"), closed.clone());
        closed.store(true, Ordering::Release);
        assert!(registry.is_closed());
        assert!(!registry.histogram(REQUEST_DURATION).is_enabled());
        assert!(!registry.gauge(PROCESS_MEMORY_BYTES).is_enabled());
    }
}
