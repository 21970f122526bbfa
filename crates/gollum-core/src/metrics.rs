//! Process-wide named counters and gauges, with on-demand rate
//! derivation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

enum MetricValue {
    Counter(AtomicI64),
    Gauge(AtomicU64), // bit pattern of an f64, per AtomicU64::{from,to}_bits
}

struct Snapshot {
    value: f64,
    at: Instant,
}

/// Process-wide metric store. `New` is idempotent: calling it again for
/// an existing name is a no-op rather than resetting the value.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, MetricValue>>,
    rate_snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.metrics.write().clear();
        self.rate_snapshots.lock().clear();
    }

    /// Declares an integer counter metric if it doesn't exist yet.
    pub fn new_counter(&self, name: &str) {
        let mut metrics = self.metrics.write();
        metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::Counter(AtomicI64::new(0)));
    }

    /// Declares a float gauge metric if it doesn't exist yet.
    pub fn new_gauge(&self, name: &str) {
        let mut metrics = self.metrics.write();
        metrics
            .entry(name.to_string())
            .or_insert_with(|| MetricValue::Gauge(AtomicU64::new(0f64.to_bits())));
    }

    /// Atomically adds `delta` to a counter, creating it at zero first
    /// if necessary.
    pub fn add(&self, name: &str, delta: i64) {
        self.new_counter(name);
        let metrics = self.metrics.read();
        if let Some(MetricValue::Counter(c)) = metrics.get(name) {
            c.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Sets an integer-valued gauge (stored as the bit pattern of the
    /// equivalent float, so both counters and gauges share one read path).
    pub fn set_i(&self, name: &str, value: i64) {
        self.set_f(name, value as f64);
    }

    /// Sets a float gauge, creating it if necessary.
    pub fn set_f(&self, name: &str, value: f64) {
        self.new_gauge(name);
        let metrics = self.metrics.read();
        if let Some(MetricValue::Gauge(g)) = metrics.get(name) {
            g.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Reads the current value of any metric as `f64`, or `None` if it
    /// doesn't exist.
    pub fn get(&self, name: &str) -> Option<f64> {
        let metrics = self.metrics.read();
        match metrics.get(name)? {
            MetricValue::Counter(c) => Some(c.load(Ordering::Relaxed) as f64),
            MetricValue::Gauge(g) => Some(f64::from_bits(g.load(Ordering::Relaxed))),
        }
    }

    /// Computes `Δvalue / Δt` (in metric units per second) against the
    /// last time this metric's rate was sampled, recording a fresh
    /// snapshot for the next call. The first call for a metric has no
    /// prior snapshot to diff against and returns `0.0`.
    pub fn rate(&self, name: &str) -> f64 {
        let Some(current) = self.get(name) else {
            return 0.0;
        };
        let now = Instant::now();
        let mut snapshots = self.rate_snapshots.lock();
        let rate = match snapshots.get(name) {
            Some(prev) => {
                let dt = now.duration_since(prev.at).as_secs_f64();
                if dt > 0.0 {
                    (current - prev.value) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        snapshots.insert(
            name.to_string(),
            Snapshot {
                value: current,
                at: now,
            },
        );
        rate
    }

    /// Snapshot of every metric as a flat name->value map, for the
    /// JSON-over-HTTP surface an external collaborator exposes.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .map(|(name, v)| {
                let value = match v {
                    MetricValue::Counter(c) => c.load(Ordering::Relaxed) as f64,
                    MetricValue::Gauge(g) => f64::from_bits(g.load(Ordering::Relaxed)),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn counter_adds_atomically() {
        let m = MetricsRegistry::new();
        m.add("Scribe:Messages-ok", 3);
        m.add("Scribe:Messages-ok", 4);
        assert_eq!(m.get("Scribe:Messages-ok"), Some(7.0));
    }

    #[test]
    fn gauge_set_overwrites() {
        let m = MetricsRegistry::new();
        m.set_f("WindowSize", 50.0);
        m.set_f("WindowSize", 25.0);
        assert_eq!(m.get("WindowSize"), Some(25.0));
    }

    #[test]
    fn rate_is_zero_on_first_sample() {
        let m = MetricsRegistry::new();
        m.add("x", 10);
        assert_eq!(m.rate("x"), 0.0);
    }

    #[test]
    fn rate_reflects_delta_over_time() {
        let m = MetricsRegistry::new();
        m.add("x", 10);
        m.rate("x"); // seed the first snapshot
        sleep(Duration::from_millis(20));
        m.add("x", 10);
        let r = m.rate("x");
        assert!(r > 0.0, "expected positive rate, got {r}");
    }

    #[test]
    fn missing_metric_reads_none() {
        let m = MetricsRegistry::new();
        assert_eq!(m.get("nope"), None);
    }
}
