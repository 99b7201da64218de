//! Metric primitives and the shared registry.
//!
//! Instruments are atomics; registration takes a short-lived map lock and
//! returns shared handles, so hot paths never touch the registry again.

// Layer 1: Standard library imports
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;

// Layer 3: Internal module imports
// (none)

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge: a value that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket histogram recording durations in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    /// Sum in microseconds, to keep an integer atomic.
    sum_us: AtomicU64,
}

impl Histogram {
    /// Default latency buckets (milliseconds).
    pub fn latency() -> Self {
        Self::with_bounds(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
    }

    pub fn with_bounds(bounds: Vec<f64>) -> Self {
        let buckets = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    /// Record an observation in milliseconds.
    pub fn observe(&self, value_ms: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value_ms <= *b)
            .unwrap_or(self.bounds.len());
        if let Some(bucket) = self.buckets.get(idx) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us
            .fetch_add((value_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observations in milliseconds.
    pub fn sum_ms(&self) -> f64 {
        self.sum_us.load(Ordering::Relaxed) as f64 / 1000.0
    }

    /// Mean observation in milliseconds (0 when empty).
    pub fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum_ms() / count as f64
        }
    }

    /// Cumulative bucket counts, aligned with the upper bounds plus +Inf.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut acc = 0u64;
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            acc += bucket.load(Ordering::Relaxed);
            let bound = self.bounds.get(i).copied().unwrap_or(f64::INFINITY);
            out.push((bound, acc));
        }
        out
    }
}

/// Shared metrics registry.
///
/// Names follow `instrument{label=value}` in the text exposition; handles
/// are keyed by the full name.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::metrics::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// registry.counter("messages_received", Some("HL7.In.TCP")).inc();
/// registry.gauge("queue_depth", Some("HL7.In.TCP")).set(3);
/// registry
///     .histogram("process_latency_ms", Some("HL7.In.TCP"))
///     .observe(12.5);
///
/// assert_eq!(
///     registry.counter("messages_received", Some("HL7.In.TCP")).value(),
///     1
/// );
/// ```
#[derive(Default, Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    counters: DashMap<String, Arc<Counter>>,
    gauges: DashMap<String, Arc<Gauge>>,
    histograms: DashMap<String, Arc<Histogram>>,
}

fn key(name: &str, host: Option<&str>) -> String {
    match host {
        Some(host) => format!("{name}{{host=\"{host}\"}}"),
        None => name.to_string(),
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter, optionally labelled by host.
    pub fn counter(&self, name: &str, host: Option<&str>) -> Arc<Counter> {
        Arc::clone(
            self.inner
                .counters
                .entry(key(name, host))
                .or_insert_with(|| Arc::new(Counter::default()))
                .value(),
        )
    }

    /// Get or create a gauge, optionally labelled by host.
    pub fn gauge(&self, name: &str, host: Option<&str>) -> Arc<Gauge> {
        Arc::clone(
            self.inner
                .gauges
                .entry(key(name, host))
                .or_insert_with(|| Arc::new(Gauge::default()))
                .value(),
        )
    }

    /// Get or create a latency histogram, optionally labelled by host.
    pub fn histogram(&self, name: &str, host: Option<&str>) -> Arc<Histogram> {
        Arc::clone(
            self.inner
                .histograms
                .entry(key(name, host))
                .or_insert_with(|| Arc::new(Histogram::latency()))
                .value(),
        )
    }

    /// Text exposition of every instrument, sorted by name.
    pub fn expose(&self) -> String {
        let mut lines = Vec::new();
        for entry in self.inner.counters.iter() {
            lines.push(format!("{} {}", entry.key(), entry.value().value()));
        }
        for entry in self.inner.gauges.iter() {
            lines.push(format!("{} {}", entry.key(), entry.value().value()));
        }
        for entry in self.inner.histograms.iter() {
            let hist = entry.value();
            let mut line = String::new();
            let _ = write!(
                line,
                "{} count={} sum_ms={:.3}",
                entry.key(),
                hist.count(),
                hist.sum_ms()
            );
            lines.push(line);
        }
        lines.sort();
        let mut out = lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let registry = MetricsRegistry::new();
        let counter = registry.counter("messages_received", Some("A"));
        counter.inc();
        counter.add(4);
        assert_eq!(counter.value(), 5);
        // Same name+label returns the same instrument.
        assert_eq!(registry.counter("messages_received", Some("A")).value(), 5);
        // Different label is a different instrument.
        assert_eq!(registry.counter("messages_received", Some("B")).value(), 0);
    }

    #[test]
    fn test_gauge() {
        let registry = MetricsRegistry::new();
        let gauge = registry.gauge("queue_depth", Some("A"));
        gauge.set(10);
        gauge.inc();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.value(), 9);
    }

    #[test]
    fn test_histogram_buckets_and_mean() {
        let hist = Histogram::with_bounds(vec![10.0, 100.0]);
        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);

        assert_eq!(hist.count(), 3);
        assert!((hist.mean_ms() - 185.0).abs() < 0.01);

        let buckets = hist.cumulative_buckets();
        assert_eq!(buckets[0], (10.0, 1));
        assert_eq!(buckets[1], (100.0, 2));
        assert_eq!(buckets[2], (f64::INFINITY, 3));
    }

    #[test]
    fn test_expose_contains_all_instruments() {
        let registry = MetricsRegistry::new();
        registry.counter("messages_received", Some("A")).inc();
        registry.gauge("queue_depth", None).set(2);
        registry.histogram("process_latency_ms", Some("A")).observe(1.0);

        let text = registry.expose();
        assert!(text.contains("messages_received{host=\"A\"} 1"));
        assert!(text.contains("queue_depth 2"));
        assert!(text.contains("process_latency_ms{host=\"A\"} count=1"));
    }
}
