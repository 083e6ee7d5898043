//! Prometheus metrics export.

use crate::error::{CacheError, Result};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The error kinds tracked individually in [`MetricsSnapshot::errors_by_kind`].
/// Kept in one place so the snapshot and the registered label set can't drift.
const ERROR_KINDS: &[&str] = &[
    "io",
    "not_found",
    "permission",
    "storage",
    "configuration",
    "processing",
    "lock_poisoned",
];

/// Orchestrator-local counters folded into `CacheStatistics` by `get_statistics`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub bloom_filter_hits: u64,
    pub errors_by_kind: HashMap<String, u64>,
    pub avg_response_time_seconds: f64,
}

/// All counters, gauges, and histograms exposed by the cache, plus the
/// lock-free running totals the orchestrator consults on the request hot path.
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounter,
    hits_total: IntCounter,
    errors_total: IntCounterVec,
    bloom_filter_hits_total: IntCounter,
    hit_rate: Gauge,
    memory_usage_bytes: Gauge,
    disk_usage_bytes: Gauge,
    response_time_seconds: Histogram,

    request_count: AtomicU64,
    hit_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::new("cache_requests_total", "Total get_content calls")
            .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let hits_total = IntCounter::new("cache_hits_total", "Total calls served without extraction")
            .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let errors_total = IntCounterVec::new(
            Opts::new("cache_errors_total", "Total errors by kind"),
            &["type"],
        )
        .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let hit_rate = Gauge::new("cache_hit_rate", "Fraction of requests served from cache")
            .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let memory_usage_bytes = Gauge::new("cache_memory_usage_bytes", "In-memory LRU footprint")
            .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let disk_usage_bytes = Gauge::new("cache_disk_usage_bytes", "Persistent store + blob footprint")
            .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let response_time_seconds = Histogram::with_opts(HistogramOpts::new(
            "cache_response_time_seconds",
            "get_content latency",
        ))
        .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;
        let bloom_filter_hits_total = IntCounter::new(
            "cache_bloom_filter_hits_total",
            "Lookups rejected by the negative-existence filter on a confirmed-absent path",
        )
        .map_err(|e| CacheError::configuration_with_source("failed to create metric", e))?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(hits_total.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(hit_rate.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(memory_usage_bytes.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(disk_usage_bytes.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(response_time_seconds.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;
        registry
            .register(Box::new(bloom_filter_hits_total.clone()))
            .map_err(|e| CacheError::configuration_with_source("failed to register metric", e))?;

        Ok(Self {
            registry,
            requests_total,
            hits_total,
            errors_total,
            bloom_filter_hits_total,
            hit_rate,
            memory_usage_bytes,
            disk_usage_bytes,
            response_time_seconds,
            request_count: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, from_cache: bool, elapsed_seconds: f64) {
        self.requests_total.inc();
        self.response_time_seconds.observe(elapsed_seconds);
        let requests = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;

        let hits = if from_cache {
            self.hits_total.inc();
            self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.hit_count.load(Ordering::Relaxed)
        };

        self.hit_rate.set(hits as f64 / requests as f64);
    }

    pub fn record_error(&self, error: &CacheError) {
        self.errors_total.with_label_values(&[error.metric_label()]).inc();
    }

    pub fn record_bloom_filter_hit(&self) {
        self.bloom_filter_hits_total.inc();
    }

    /// Snapshot every orchestrator-local counter for folding into
    /// `CacheStatistics`: requests, hits, misses, filter hits, an error
    /// histogram by kind, and the mean `get_content` response time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.request_count.load(Ordering::Relaxed);
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = requests.saturating_sub(hits);
        let bloom_filter_hits = self.bloom_filter_hits_total.get() as u64;

        let errors_by_kind = ERROR_KINDS
            .iter()
            .map(|kind| (kind.to_string(), self.errors_total.with_label_values(&[kind]).get() as u64))
            .filter(|(_, count)| *count > 0)
            .collect();

        let sample_count = self.response_time_seconds.get_sample_count();
        let avg_response_time_seconds = if sample_count > 0 {
            self.response_time_seconds.get_sample_sum() / sample_count as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            requests,
            hits,
            misses,
            bloom_filter_hits,
            errors_by_kind,
            avg_response_time_seconds,
        }
    }

    pub fn set_memory_usage_bytes(&self, bytes: u64) {
        self.memory_usage_bytes.set(bytes as f64);
    }

    pub fn set_disk_usage_bytes(&self, bytes: u64) {
        self.disk_usage_bytes.set(bytes as f64);
    }

    /// Render all registered metrics in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| CacheError::storage_with_source("failed to encode metrics", e))?;
        String::from_utf8(buffer).map_err(|e| CacheError::storage_with_source("metrics output was not valid utf-8", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_updates_hit_rate() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(true, 0.01);
        metrics.record_request(false, 0.02);
        assert_eq!(metrics.hit_rate.get(), 0.5);
    }

    #[test]
    fn record_error_increments_labeled_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.record_error(&CacheError::configuration("bad config"));
        let rendered = metrics.render_prometheus().unwrap();
        assert!(rendered.contains("cache_errors_total"));
        assert!(rendered.contains("type=\"configuration\""));
    }

    #[test]
    fn snapshot_combines_counters_and_errors() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(true, 0.01);
        metrics.record_request(false, 0.03);
        metrics.record_bloom_filter_hit();
        metrics.record_error(&CacheError::NotFound { path: "/x".into() });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.bloom_filter_hits, 1);
        assert_eq!(snapshot.errors_by_kind.get("not_found"), Some(&1));
        assert!((snapshot.avg_response_time_seconds - 0.02).abs() < 1e-9);
    }

    #[test]
    fn render_prometheus_includes_all_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(true, 0.005);
        metrics.set_memory_usage_bytes(1024);
        metrics.set_disk_usage_bytes(4096);

        let rendered = metrics.render_prometheus().unwrap();
        assert!(rendered.contains("cache_requests_total"));
        assert!(rendered.contains("cache_hits_total"));
        assert!(rendered.contains("cache_hit_rate"));
        assert!(rendered.contains("cache_memory_usage_bytes"));
        assert!(rendered.contains("cache_disk_usage_bytes"));
        assert!(rendered.contains("cache_response_time_seconds"));
    }
}
