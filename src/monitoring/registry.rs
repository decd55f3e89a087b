//! Prometheus-style metric registry.
//!
//! Provides gauges and histograms keyed by name and label set.

use crate::monitoring::metrics::{exposition_labels, exposition_name};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Default histogram buckets, in seconds.
pub const DEFAULT_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64, // f64 bits
}

impl Gauge {
    /// Create a new gauge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// A histogram metric for measuring distributions.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default buckets.
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS.to_vec())
    }

    /// Create with custom buckets.
    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a value.
    pub fn observe(&self, value: f64) {
        for (i, bucket) in self.buckets.iter().enumerate() {
            if value <= *bucket {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }

        // CAS loop so concurrent observers never lose a sample from the sum
        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get observation count.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get sum of observations.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Cumulative `(upper_bound, count)` pairs.
    pub fn bucket_counts(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(&self.bucket_counts)
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Series identity: exposition name plus rendered label set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SeriesKey {
    name: String,
    labels: String,
}

impl SeriesKey {
    fn new(name: &str, labels: &HashMap<String, String>) -> Self {
        Self {
            name: exposition_name(name),
            labels: exposition_labels(labels),
        }
    }
}

/// Registry of lazily created metrics, exported in Prometheus text format.
pub struct MetricsRegistry {
    namespace: String,
    gauges: RwLock<BTreeMap<SeriesKey, Gauge>>,
    histograms: RwLock<BTreeMap<SeriesKey, Histogram>>,
}

impl MetricsRegistry {
    /// Create a registry whose exported names are prefixed with `namespace`.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: exposition_name(namespace),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(&self, name: &str, labels: &HashMap<String, String>) -> SeriesKey {
        let mut key = SeriesKey::new(name, labels);
        if !self.namespace.is_empty() {
            key.name = format!("{}_{}", self.namespace, key.name);
        }
        key
    }

    /// Set a gauge, creating it on first use.
    pub fn set_gauge(&self, name: &str, value: f64, labels: &HashMap<String, String>) {
        let key = self.key(name, labels);
        if let Some(gauge) = read(&self.gauges).get(&key) {
            gauge.set(value);
            return;
        }
        write(&self.gauges).entry(key).or_default().set(value);
    }

    /// Observe a histogram sample, creating the histogram on first use.
    pub fn observe_histogram(&self, name: &str, value: f64, labels: &HashMap<String, String>) {
        let key = self.key(name, labels);
        if let Some(histogram) = read(&self.histograms).get(&key) {
            histogram.observe(value);
            return;
        }
        write(&self.histograms).entry(key).or_default().observe(value);
    }

    /// Get gauge value.
    pub fn gauge(&self, name: &str, labels: &HashMap<String, String>) -> Option<f64> {
        read(&self.gauges).get(&self.key(name, labels)).map(Gauge::get)
    }

    /// Export metrics in Prometheus format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let mut last_type: Option<String> = None;
        for (key, gauge) in read(&self.gauges).iter() {
            type_line(&mut output, &mut last_type, &key.name, "gauge");
            output.push_str(&format!("{}{} {}\n", key.name, key.labels, gauge.get()));
        }

        last_type = None;
        for (key, histogram) in read(&self.histograms).iter() {
            type_line(&mut output, &mut last_type, &key.name, "histogram");
            for (bound, count) in histogram.bucket_counts() {
                output.push_str(&format!(
                    "{}_bucket{} {}\n",
                    key.name,
                    with_le(&key.labels, &bound.to_string()),
                    count
                ));
            }
            output.push_str(&format!(
                "{}_bucket{} {}\n",
                key.name,
                with_le(&key.labels, "+Inf"),
                histogram.count()
            ));
            output.push_str(&format!("{}_sum{} {}\n", key.name, key.labels, histogram.sum()));
            output.push_str(&format!("{}_count{} {}\n", key.name, key.labels, histogram.count()));
        }

        output
    }
}

fn type_line(output: &mut String, last: &mut Option<String>, name: &str, kind: &str) {
    if last.as_deref() != Some(name) {
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        *last = Some(name.to_string());
    }
}

fn with_le(labels: &str, le: &str) -> String {
    match labels.strip_suffix('}') {
        Some(open) => format!("{},le=\"{}\"}}", open, le),
        None => format!("{{le=\"{}\"}}", le),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}
