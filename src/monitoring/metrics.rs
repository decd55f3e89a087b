//! Bounded time-series metrics store.
//!
//! Keeps a per-name ring buffer of scalar observations.

use crate::core::{lock, now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

/// Default number of points retained per metric name.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A single scalar observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// When the value was observed
    pub timestamp: Timestamp,
    /// Metric name
    pub name: String,
    /// Observed value
    pub value: f64,
    /// Free-form tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MetricPoint {
    /// Create a point stamped with the current time.
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            timestamp: now(),
            name: name.to_string(),
            value,
            tags: HashMap::new(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Merge a set of tags.
    pub fn with_tags(mut self, tags: &HashMap<String, String>) -> Self {
        self.tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Aggregate view over a window of one series.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Number of points in the window
    pub count: usize,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Most recent value
    pub latest: f64,
}

/// In-memory store of bounded metric series.
///
/// One lock covers every public call; reads hand back copies.
pub struct MetricsStore {
    capacity: usize,
    series: Mutex<HashMap<String, VecDeque<MetricPoint>>>,
}

impl MetricsStore {
    /// Create a store with the default per-series capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store retaining at most `capacity` points per name.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Per-series capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a point, evicting the oldest one when the series is full.
    pub fn record(&self, point: MetricPoint) {
        let mut series = lock(&self.series);
        let buffer = series
            .entry(point.name.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(point);
    }

    /// Copy of all points for `name` observed at or after `since`.
    pub fn since(&self, name: &str, since: Timestamp) -> Vec<MetricPoint> {
        lock(&self.series)
            .get(name)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|p| p.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent point for `name`.
    pub fn latest(&self, name: &str) -> Option<MetricPoint> {
        lock(&self.series)
            .get(name)
            .and_then(|buffer| buffer.back().cloned())
    }

    /// Most recent value for `name`.
    pub fn latest_value(&self, name: &str) -> Option<f64> {
        self.latest(name).map(|p| p.value)
    }

    /// Names of all tracked series, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.series).keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of retained points for `name`.
    pub fn len(&self, name: &str) -> usize {
        lock(&self.series).get(name).map_or(0, VecDeque::len)
    }

    /// True when no series exist.
    pub fn is_empty(&self) -> bool {
        lock(&self.series).is_empty()
    }

    /// Summarise the points of `name` observed at or after `since`.
    pub fn summary(&self, name: &str, since: Timestamp) -> Option<MetricSummary> {
        let series = lock(&self.series);
        let mut window = series.get(name)?.iter().filter(|p| p.timestamp >= since);

        let first = window.next()?;
        let mut summary = MetricSummary {
            count: 1,
            min: first.value,
            max: first.value,
            mean: first.value,
            latest: first.value,
        };
        let mut sum = first.value;
        for point in window {
            summary.count += 1;
            summary.min = summary.min.min(point.value);
            summary.max = summary.max.max(point.value);
            summary.latest = point.value;
            sum += point.value;
        }
        summary.mean = sum / summary.count as f64;
        Some(summary)
    }

    /// Copy of every series, keyed and ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<MetricPoint>> {
        lock(&self.series)
            .iter()
            .map(|(name, buffer)| (name.clone(), buffer.iter().cloned().collect()))
            .collect()
    }

    /// Drop every series.
    pub fn reset(&self) {
        lock(&self.series).clear();
    }

    /// Export the latest value of each series in text exposition format.
    pub fn export_text(&self) -> String {
        let series = lock(&self.series);
        let mut names: Vec<&String> = series.keys().collect();
        names.sort();

        let mut output = String::new();
        for name in names {
            if let Some(point) = series.get(name).and_then(|b| b.back()) {
                let metric = exposition_name(name);
                output.push_str(&format!("# TYPE {} gauge\n", metric));
                output.push_str(&format!(
                    "{}{} {} {}\n",
                    metric,
                    exposition_labels(&point.tags),
                    point.value,
                    point.timestamp.timestamp_millis()
                ));
            }
        }
        output
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a dotted metric name onto the exposition character set.
pub(crate) fn exposition_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

/// Render tags as a sorted `{k="v",...}` label set.
pub(crate) fn exposition_labels(tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort();
    let body: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| {
            format!(
                "{}=\"{}\"",
                exposition_name(k),
                v.replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
        .collect();
    format!("{{{}}}", body.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_and_latest() {
        let store = MetricsStore::new();
        assert!(store.latest("cpu").is_none());

        store.record(MetricPoint::new("cpu", 10.0));
        store.record(MetricPoint::new("cpu", 20.0));

        assert_eq!(store.latest_value("cpu"), Some(20.0));
        assert_eq!(store.len("cpu"), 2);
        assert_eq!(store.names(), vec!["cpu".to_string()]);
    }

    #[test]
    fn test_bounded_fifo_keeps_most_recent() {
        let store = MetricsStore::with_capacity(5);
        for i in 0..12 {
            store.record(MetricPoint::new("x", i as f64));
        }

        let values: Vec<f64> = store
            .since("x", now() - Duration::hours(1))
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_since_filters_and_copies() {
        let store = MetricsStore::new();
        let base = now();
        store.record(MetricPoint::new("m", 1.0).at(base - Duration::minutes(10)));
        store.record(MetricPoint::new("m", 2.0).at(base - Duration::minutes(5)));
        store.record(MetricPoint::new("m", 3.0).at(base));

        let mut recent = store.since("m", base - Duration::minutes(5));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value, 2.0);

        recent.clear();
        assert_eq!(store.len("m"), 3);
        assert!(store.since("missing", base).is_empty());
    }

    #[test]
    fn test_series_are_independent() {
        let store = MetricsStore::with_capacity(2);
        store.record(MetricPoint::new("a", 1.0));
        store.record(MetricPoint::new("a", 2.0));
        store.record(MetricPoint::new("a", 3.0));
        store.record(MetricPoint::new("b", 9.0));

        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 1);
    }

    #[test]
    fn test_summary() {
        let store = MetricsStore::new();
        for v in [4.0, 8.0, 6.0] {
            store.record(MetricPoint::new("lat", v));
        }

        let summary = store.summary("lat", now() - Duration::hours(1)).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 4.0);
        assert_eq!(summary.max, 8.0);
        assert!((summary.mean - 6.0).abs() < 1e-10);
        assert_eq!(summary.latest, 6.0);

        assert!(store.summary("lat", now() + Duration::hours(1)).is_none());
    }

    #[test]
    fn test_reset() {
        let store = MetricsStore::new();
        store.record(MetricPoint::new("a", 1.0));
        store.reset();
        assert!(store.is_empty());
        assert!(store.latest("a").is_none());
    }

    #[test]
    fn test_export_text() {
        let store = MetricsStore::new();
        store.record(MetricPoint::new("system.cpu_percent", 42.5).with_tag("type", "system"));

        let output = store.export_text();
        assert!(output.contains("# TYPE system_cpu_percent gauge"));
        assert!(output.contains("system_cpu_percent{type=\"system\"} 42.5"));
    }
}
