//! Metrics of the accumulator engine
//!
//! Metric structs contain [`Count`] and [`Time`] fields and derive
//! `MetricsSetBuilder` to snapshot themselves into a [`MetricsSet`]

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

/// A counter
#[derive(Debug)]
pub struct Count(AtomicU64);

impl Count {
    /// Create a new [`Count`]
    #[inline]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Add `n` to the counter
    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Relaxed);
    }

    /// Get the value of the counter
    #[inline]
    pub fn value(&self) -> u64 {
        self.0.load(Relaxed)
    }
}

impl Default for Count {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Measure a potentially non contiguous duration of time, in nanoseconds
#[derive(Debug)]
pub struct Time(AtomicU64);

impl Time {
    /// Create a new [`Time`]
    #[inline]
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Add duration to the time metric
    #[inline]
    pub fn add_duration(&self, duration: Duration) {
        self.0.fetch_add(duration.as_nanos() as _, Relaxed);
    }

    /// Get the number of nanoseconds
    #[inline]
    pub fn nanoseconds(&self) -> u64 {
        self.0.load(Relaxed)
    }

    /// Get the duration
    #[inline]
    pub fn value(&self) -> Duration {
        Duration::from_nanos(self.nanoseconds())
    }
}

impl Default for Time {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a single metric
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    Count(u64),
    Time(Duration),
}

impl Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Time(time) => write!(f, "{time:?}"),
        }
    }
}

/// Snapshot of the metrics of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSet {
    /// Name of the metric struct
    pub name: &'static str,
    /// Metrics, keyed by the field name
    pub metrics: BTreeMap<&'static str, MetricValue>,
}

impl MetricsSet {
    /// Get the metric with given name
    #[inline]
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Get the counter with given name. Returns `None` if the metric does not exist or
    /// it is not a counter
    pub fn count(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            MetricValue::Count(count) => Some(count),
            MetricValue::Time(_) => None,
        }
    }

    /// Format the metrics without the timing, the output is stable across runs
    pub fn display_counts(&self) -> String {
        let counts = self
            .metrics
            .iter()
            .filter_map(|(name, value)| match value {
                MetricValue::Count(count) => Some(format!("{name}: {count}")),
                MetricValue::Time(_) => None,
            })
            .collect::<Vec<_>>();
        format!("{}{{ {} }}", self.name, counts.join(", "))
    }
}

impl Display for MetricsSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{ ", self.name)?;
        let mut iter = self.metrics.iter();
        if let Some((name, value)) = iter.next() {
            write!(f, "{name}: {value}")?;
            iter.try_for_each(|(name, value)| write!(f, ", {name}: {value}"))?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use granary_procedural_macro::MetricsSetBuilder;

    use super::*;

    #[derive(Debug, Default, MetricsSetBuilder)]
    struct DummyMetrics {
        num_rows: Count,
        num_batches: Count,
        elapsed: Time,
    }

    #[test]
    fn test_derive_metrics_set() {
        let metrics = DummyMetrics::default();
        metrics.num_rows.add(1024);
        metrics.num_rows.add(3);
        metrics.num_batches.add(2);
        metrics.elapsed.add_duration(Duration::from_micros(7));

        let set = metrics.metrics_set();
        assert_eq!(set.count("num_rows"), Some(1027));
        assert_eq!(set.get("elapsed"), Some(MetricValue::Time(Duration::from_micros(7))));
        assert_eq!(set.count("elapsed"), None);

        let expect = expect_test::expect!["DummyMetrics{ num_batches: 2, num_rows: 1027 }"];
        expect.assert_eq(&set.display_counts());
        let expect =
            expect_test::expect!["DummyMetrics{ elapsed: 7µs, num_batches: 2, num_rows: 1027 }"];
        expect.assert_eq(&set.to_string());
    }
}
