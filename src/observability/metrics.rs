use prometheus::core::Collector;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use crate::error::{SupportError, SupportResult};

/// Prometheus metrics registry and collectors
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

/// All support core metrics
pub struct Metrics {
    // Cache metrics
    pub cache_hits_total: CounterVec,
    pub cache_misses_total: CounterVec,
    pub cache_evictions_total: CounterVec,
    pub cache_expired_total: Counter,
    pub cache_entries: GaugeVec,

    // Rate limiter metrics
    pub rate_limit_allowed_total: Counter,
    pub rate_limit_denied_total: CounterVec,
    pub rate_limit_fail_open_total: Counter,
    pub tokens_reported_total: Counter,

    // Analytics metrics
    pub analytics_events_queued: Gauge,
    pub analytics_events_flushed_total: Counter,
    pub analytics_events_dropped_total: Counter,
    pub analytics_flush_failures_total: Counter,
    pub analytics_flush_duration_seconds: Histogram,

    // Background write metrics
    pub store_writes_total: Counter,
    pub store_write_failures_total: Counter,
    pub store_writes_dropped_total: Counter,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all collectors
    pub fn new() -> SupportResult<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);

        Ok(Self { registry, metrics })
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> SupportResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SupportError::Internal(format!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer)
            .map_err(|e| SupportError::Internal(format!("Failed to convert metrics to string: {}", e)))
    }

    /// Get the underlying registry for exporter integration
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

fn register<C>(registry: &Registry, collector: C, name: &str) -> SupportResult<C>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| SupportError::Internal(format!("Failed to register {}: {}", name, e)))?;
    Ok(collector)
}

fn counter(registry: &Registry, name: &str, help: &str) -> SupportResult<Counter> {
    let metric = Counter::new(name, help)
        .map_err(|e| SupportError::Internal(format!("Failed to create {} metric: {}", name, e)))?;
    register(registry, metric, name)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> SupportResult<CounterVec> {
    let metric = CounterVec::new(Opts::new(name, help), labels)
        .map_err(|e| SupportError::Internal(format!("Failed to create {} metric: {}", name, e)))?;
    register(registry, metric, name)
}

impl Metrics {
    fn new(registry: &Registry) -> SupportResult<Self> {
        let cache_entries = GaugeVec::new(
            Opts::new("rag_cache_entries", "Live entries per cache store"),
            &["category"],
        )
        .map_err(|e| SupportError::Internal(format!("Failed to create rag_cache_entries metric: {}", e)))?;

        let analytics_events_queued = Gauge::new(
            "rag_analytics_events_queued",
            "Telemetry events waiting for the next flush",
        )
        .map_err(|e| SupportError::Internal(format!("Failed to create rag_analytics_events_queued metric: {}", e)))?;

        let analytics_flush_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rag_analytics_flush_duration_seconds",
                "Duration of analytics batch flushes in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )
        .map_err(|e| {
            SupportError::Internal(format!("Failed to create rag_analytics_flush_duration_seconds metric: {}", e))
        })?;

        Ok(Self {
            cache_hits_total: counter_vec(registry, "rag_cache_hits_total", "Cache hits per category", &["category"])?,
            cache_misses_total: counter_vec(registry, "rag_cache_misses_total", "Cache misses per category", &["category"])?,
            cache_evictions_total: counter_vec(
                registry,
                "rag_cache_evictions_total",
                "Entries evicted by the size bound per category",
                &["category"],
            )?,
            cache_expired_total: counter(registry, "rag_cache_expired_total", "Entries removed after their TTL")?,
            cache_entries: register(registry, cache_entries, "rag_cache_entries")?,

            rate_limit_allowed_total: counter(registry, "rag_rate_limit_allowed_total", "Requests allowed")?,
            rate_limit_denied_total: counter_vec(
                registry,
                "rag_rate_limit_denied_total",
                "Requests denied per reason",
                &["reason"],
            )?,
            rate_limit_fail_open_total: counter(
                registry,
                "rag_rate_limit_fail_open_total",
                "Decisions that defaulted to allow after an internal error",
            )?,
            tokens_reported_total: counter(registry, "rag_tokens_reported_total", "AI tokens reported by callers")?,

            analytics_events_queued: register(registry, analytics_events_queued, "rag_analytics_events_queued")?,
            analytics_events_flushed_total: counter(
                registry,
                "rag_analytics_events_flushed_total",
                "Telemetry events written to the store",
            )?,
            analytics_events_dropped_total: counter(
                registry,
                "rag_analytics_events_dropped_total",
                "Telemetry events dropped by the queue bound",
            )?,
            analytics_flush_failures_total: counter(
                registry,
                "rag_analytics_flush_failures_total",
                "Failed analytics flushes",
            )?,
            analytics_flush_duration_seconds: register(
                registry,
                analytics_flush_duration_seconds,
                "rag_analytics_flush_duration_seconds",
            )?,

            store_writes_total: counter(registry, "rag_store_writes_total", "Background writes applied")?,
            store_write_failures_total: counter(
                registry,
                "rag_store_write_failures_total",
                "Background writes that failed",
            )?,
            store_writes_dropped_total: counter(
                registry,
                "rag_store_writes_dropped_total",
                "Background writes dropped because the queue was full",
            )?,
        })
    }
}

/// Timer helper for measuring durations
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    pub fn new(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn observe(self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}
