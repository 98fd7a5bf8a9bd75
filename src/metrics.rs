//! Prometheus metrics for the adaptation loop
//!
//! Exposes cache and throughput metrics:
//! - Cache update outcomes and occupancy per cache
//! - Cache lookup latency
//! - Samples processed, split by correctness
//!
//! Metrics are instrumentation only; nothing in the adaptation path reads them.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    /// Cache update outcomes (inserted, replaced, rejected, gated)
    pub static ref CACHE_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tda_cache_updates_total", "Total cache update attempts by outcome"),
        &["cache", "outcome"]
    ).unwrap();

    /// Entries currently held per cache
    pub static ref CACHE_ENTRIES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("tda_cache_entries", "Entries currently held per cache"),
        &["cache"]
    ).unwrap();

    /// Bytes currently held per cache (updated at telemetry cadence)
    pub static ref CACHE_BYTES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("tda_cache_bytes", "Bytes currently held per cache"),
        &["cache"]
    ).unwrap();

    /// Time spent scoring the query against both caches
    pub static ref CACHE_LOOKUP_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tda_cache_lookup_duration_seconds",
            "Cache lookup (affinity scoring) duration"
        )
        .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05])
    ).unwrap();

    /// Samples processed
    pub static ref SAMPLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tda_samples_total", "Total samples processed"),
        &["result"]  // result: "correct" or "incorrect"
    ).unwrap();

    /// Telemetry computations that failed and were skipped
    pub static ref TELEMETRY_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tda_telemetry_errors_total", "Telemetry computations skipped on error"),
        &["code"]
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(CACHE_UPDATES_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CACHE_ENTRIES.clone()))?;
    METRICS_REGISTRY.register(Box::new(CACHE_BYTES.clone()))?;
    METRICS_REGISTRY.register(Box::new(CACHE_LOOKUP_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(SAMPLES_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(TELEMETRY_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Render the registry in text exposition format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_handles_usable_without_registration() {
        CACHE_UPDATES_TOTAL
            .with_label_values(&["positive", "inserted"])
            .inc();
        assert!(
            CACHE_UPDATES_TOTAL
                .with_label_values(&["positive", "inserted"])
                .get()
                >= 1
        );
    }
}
