//! §6.4 metrics surface: counters, histograms, and gauges over a concurrent
//! registry, grounded in the teacher's `dashmap`-backed in-memory stores.
//!
//! This is a minimal self-contained registry rather than a `prometheus`
//! client binding — the crate is a library embedded in a larger service,
//! and the host application is expected to scrape `Metrics::snapshot()`
//! into whatever exporter it already runs.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Histogram {
    count: AtomicU64,
    sum_millis: AtomicU64,
}

impl Histogram {
    fn observe(&self, value_seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_millis
            .fetch_add((value_seconds * 1000.0) as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, f64) {
        let count = self.count.load(Ordering::Relaxed);
        let sum_millis = self.sum_millis.load(Ordering::Relaxed);
        (count, sum_millis as f64 / 1000.0)
    }
}

/// Process-wide metrics registry. Cheap to clone (`Arc` inside); one
/// instance is shared across `IntentRouter`, `GuidedDialogEngine`, and
/// `HITLController`.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    routing_requests_total: DashMap<(String, String), AtomicU64>,
    hitl_requests_total: DashMap<(String, String), AtomicU64>,
    system_source_requests_total: DashMap<String, AtomicU64>,
    routing_latency_seconds: DashMap<String, Histogram>,
    hitl_approval_time_seconds: Histogram,
    dialog_duration_seconds: Histogram,
    dialog_active_count: AtomicI64,
    hitl_pending_count: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_routing_requests(&self, category: &str, layer: &str) {
        self.inner
            .routing_requests_total
            .entry((category.to_string(), layer.to_string()))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hitl_requests(&self, level: &str, status: &str) {
        self.inner
            .hitl_requests_total
            .entry((level.to_string(), status.to_string()))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_system_source_requests(&self, source: &str) {
        self.inner
            .system_source_requests_total
            .entry(source.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_routing_latency(&self, layer: &str, seconds: f64) {
        self.inner
            .routing_latency_seconds
            .entry(layer.to_string())
            .or_default()
            .observe(seconds);
    }

    pub fn observe_hitl_approval_time(&self, seconds: f64) {
        self.inner.hitl_approval_time_seconds.observe(seconds);
    }

    pub fn observe_dialog_duration(&self, seconds: f64) {
        self.inner.dialog_duration_seconds.observe(seconds);
    }

    pub fn inc_dialog_active(&self) {
        self.inner.dialog_active_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_dialog_active(&self) {
        self.inner.dialog_active_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_hitl_pending(&self, value: i64) {
        self.inner.hitl_pending_count.store(value, Ordering::Relaxed);
    }

    pub fn routing_requests_total(&self, category: &str, layer: &str) -> u64 {
        self.inner
            .routing_requests_total
            .get(&(category.to_string(), layer.to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn routing_latency_snapshot(&self, layer: &str) -> (u64, f64) {
        self.inner
            .routing_latency_seconds
            .get(layer)
            .map(|h| h.snapshot())
            .unwrap_or((0, 0.0))
    }

    pub fn dialog_active_count(&self) -> i64 {
        self.inner.dialog_active_count.load(Ordering::Relaxed)
    }

    pub fn hitl_pending_count(&self) -> i64 {
        self.inner.hitl_pending_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_pair() {
        let metrics = Metrics::new();
        metrics.inc_routing_requests("incident", "pattern");
        metrics.inc_routing_requests("incident", "pattern");
        metrics.inc_routing_requests("incident", "semantic");

        assert_eq!(metrics.routing_requests_total("incident", "pattern"), 2);
        assert_eq!(metrics.routing_requests_total("incident", "semantic"), 1);
        assert_eq!(metrics.routing_requests_total("query", "pattern"), 0);
    }

    #[test]
    fn dialog_active_count_tracks_inc_dec() {
        let metrics = Metrics::new();
        metrics.inc_dialog_active();
        metrics.inc_dialog_active();
        metrics.dec_dialog_active();
        assert_eq!(metrics.dialog_active_count(), 1);
    }

    #[test]
    fn latency_histogram_accumulates_count_and_sum() {
        let metrics = Metrics::new();
        metrics.observe_routing_latency("pattern", 0.005);
        metrics.observe_routing_latency("pattern", 0.010);
        let (count, sum) = metrics.routing_latency_snapshot("pattern");
        assert_eq!(count, 2);
        assert!((sum - 0.015).abs() < 1e-6);
    }
}
