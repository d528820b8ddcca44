//! Process-wide counters, gauges, and histograms.
//!
//! Counters are atomic; histograms are mutex-guarded sample vectors reduced
//! to count/sum/min/max/p50/p95/p99 on read using a sorted-index
//! percentile technique, generalized here from a one-shot post-hoc report
//! into a live sink.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// Critical metrics that must alert if non-zero in a window.
pub const CRITICAL_COUNTERS: &[&str] = &[
    "flow_mismatch_total",
    "zero_techniques_total",
    "builder_invariant_violations",
    "canary_test_failed",
    "receipt_invalid_total",
];

#[derive(Default)]
struct Histogram {
    samples: Mutex<Vec<f64>>,
}

impl Histogram {
    fn record(&self, value: f64) {
        self.samples.lock().unwrap().push(value);
    }

    fn summary(&self) -> HistogramSummary {
        let mut sorted = self.samples.lock().unwrap().clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        percentile_summary(&sorted)
    }
}

/// Compute the p-th percentile from an already-sorted slice via the
/// `idx = (p * len / 100).min(len - 1)` index technique.
fn percentile(sorted: &[f64], p: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
    sorted[idx]
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

fn percentile_summary(sorted: &[f64]) -> HistogramSummary {
    if sorted.is_empty() {
        return HistogramSummary {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
        };
    }
    HistogramSummary {
        count: sorted.len() as u64,
        sum: sorted.iter().sum(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(sorted, 50),
        p95: percentile(sorted, 95),
        p99: percentile(sorted, 99),
    }
}

/// Process-wide metrics registry. Handed out as an `Arc` dependency rather
/// than discovered through ambient lookup, keeping global mutable state
/// explicit at each call site.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, AtomicU64>>,
    gauges: Mutex<HashMap<String, AtomicI64>>,
    histograms: Mutex<HashMap<String, Histogram>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, n: u64) {
        let mut counters = self.counters.lock().unwrap();
        counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        let mut gauges = self.gauges.lock().unwrap();
        gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn gauge(&self, name: &str) -> i64 {
        self.gauges
            .lock()
            .unwrap()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn observe(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.lock().unwrap();
        histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::default)
            .record(value);
    }

    pub fn histogram_summary(&self, name: &str) -> Option<HistogramSummary> {
        self.histograms.lock().unwrap().get(name).map(|h| h.summary())
    }

    /// Whether any critical counter is non-zero — used by the canary's
    /// alerting hook and surfaced (read-only) through `GET /metrics`.
    pub fn any_critical_nonzero(&self) -> bool {
        CRITICAL_COUNTERS.iter().any(|c| self.counter(c) > 0)
    }

    /// JSON envelope for `GET /metrics`.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters: HashMap<String, u64> = self
            .counters
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let gauges: HashMap<String, i64> = self
            .gauges
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let histograms: HashMap<String, HistogramSummary> = self
            .histograms
            .lock()
            .unwrap()
            .iter()
            .map(|(k, h)| (k.clone(), h.summary()))
            .collect();
        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }

    /// Render as Prometheus text exposition format.
    pub fn to_prometheus_text(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for (name, value) in &snapshot.counters {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        for (name, value) in &snapshot.gauges {
            out.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
        }
        for (name, summary) in &snapshot.histograms {
            out.push_str(&format!("# TYPE {name} summary\n"));
            out.push_str(&format!("{name}_count {}\n", summary.count));
            out.push_str(&format!("{name}_sum {}\n", summary.sum));
            out.push_str(&format!("{name}{{quantile=\"0.5\"}} {}\n", summary.p50));
            out.push_str(&format!("{name}{{quantile=\"0.95\"}} {}\n", summary.p95));
            out.push_str(&format!("{name}{{quantile=\"0.99\"}} {}\n", summary.p99));
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, i64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.incr("flow_mismatch_total");
        m.incr("flow_mismatch_total");
        assert_eq!(m.counter("flow_mismatch_total"), 2);
    }

    #[test]
    fn histogram_percentiles() {
        let m = Metrics::new();
        for v in 1..=100 {
            m.observe("latency_ms", v as f64);
        }
        let summary = m.histogram_summary("latency_ms").unwrap();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 100.0);
        assert_eq!(summary.p50, 51.0);
    }

    #[test]
    fn critical_nonzero_detection() {
        let m = Metrics::new();
        assert!(!m.any_critical_nonzero());
        m.incr("canary_test_failed");
        assert!(m.any_critical_nonzero());
    }
}
