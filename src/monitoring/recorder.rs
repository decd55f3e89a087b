//! Operation outcome recording.
//!
//! The inbound contract for instrumented pipeline stages: report how long an
//! operation took and whether it succeeded.

use crate::core::lock;
use crate::monitoring::metrics::MetricPoint;
use crate::monitoring::sink::MetricsSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const OPERATION_DURATION: &str = "operation.duration_seconds";
pub const REQUEST_COUNT: &str = "app.request_count";
pub const ERROR_COUNT: &str = "app.error_count";
pub const GENERATION_DURATION: &str = "generation.duration_seconds";
pub const AUDIT_DURATION: &str = "audit.duration_seconds";
pub const DEPLOYMENT_DURATION: &str = "deployment.duration_seconds";

/// Running operation totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    /// Operations reported
    pub request_count: u64,
    /// Operations reported as failed
    pub error_count: u64,
}

/// Records operation durations and outcomes.
///
/// Totals are updated and published under one lock, so the count series
/// never step backwards.
pub struct OperationRecorder {
    sink: Arc<dyn MetricsSink>,
    counts: Mutex<OperationCounts>,
}

impl OperationRecorder {
    /// Create a recorder writing to `sink`.
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            counts: Mutex::new(OperationCounts::default()),
        }
    }

    /// Record one operation and the updated running totals.
    pub fn record_operation(
        &self,
        duration_seconds: f64,
        success: bool,
        tags: &HashMap<String, String>,
    ) -> OperationCounts {
        let outcome = if success { "success" } else { "failure" };
        self.sink.record(
            MetricPoint::new(OPERATION_DURATION, duration_seconds)
                .with_tags(tags)
                .with_tag("outcome", outcome),
        );

        let mut counts = lock(&self.counts);
        counts.request_count += 1;
        if !success {
            counts.error_count += 1;
        }
        self.sink
            .record(MetricPoint::new(REQUEST_COUNT, counts.request_count as f64));
        self.sink
            .record(MetricPoint::new(ERROR_COUNT, counts.error_count as f64));
        *counts
    }

    /// Record a contract generation run.
    pub fn record_generation(&self, duration_seconds: f64, success: bool, model: &str) {
        let tags = tags(&[("stage", "generation"), ("model", model)]);
        self.record_stage(GENERATION_DURATION, duration_seconds, success, tags);
    }

    /// Record a security audit run.
    pub fn record_audit(&self, duration_seconds: f64, success: bool, severity: &str) {
        let tags = tags(&[("stage", "audit"), ("severity", severity)]);
        self.record_stage(AUDIT_DURATION, duration_seconds, success, tags);
    }

    /// Record a contract deployment.
    pub fn record_deployment(&self, duration_seconds: f64, success: bool, network: &str) {
        let tags = tags(&[("stage", "deployment"), ("network", network)]);
        self.record_stage(DEPLOYMENT_DURATION, duration_seconds, success, tags);
    }

    fn record_stage(
        &self,
        metric: &str,
        duration_seconds: f64,
        success: bool,
        tags: HashMap<String, String>,
    ) {
        let outcome = if success { "success" } else { "failure" };
        self.sink.record(
            MetricPoint::new(metric, duration_seconds)
                .with_tags(&tags)
                .with_tag("outcome", outcome),
        );
        self.record_operation(duration_seconds, success, &tags);
    }

    /// Start timing an operation; the guard records when finished or dropped.
    pub fn time(&self, tags: HashMap<String, String>) -> OperationTimer<'_> {
        OperationTimer {
            recorder: self,
            started: Instant::now(),
            tags,
            done: false,
        }
    }

    /// Current running totals.
    pub fn counts(&self) -> OperationCounts {
        *lock(&self.counts)
    }
}

/// Guard measuring one operation.
///
/// Dropping the guard without calling [`OperationTimer::finish`] records a
/// failure.
pub struct OperationTimer<'a> {
    recorder: &'a OperationRecorder,
    started: Instant,
    tags: HashMap<String, String>,
    done: bool,
}

impl OperationTimer<'_> {
    /// Record the operation with the given outcome.
    pub fn finish(mut self, success: bool) -> OperationCounts {
        self.done = true;
        self.recorder
            .record_operation(self.started.elapsed().as_secs_f64(), success, &self.tags)
    }
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.recorder
                .record_operation(self.started.elapsed().as_secs_f64(), false, &self.tags);
        }
    }
}

fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::MetricsStore;

    fn recorder() -> (Arc<MetricsStore>, OperationRecorder) {
        let store = Arc::new(MetricsStore::new());
        let recorder = OperationRecorder::new(store.clone());
        (store, recorder)
    }

    #[test]
    fn test_record_operation_counts() {
        let (store, recorder) = recorder();
        recorder.record_operation(0.5, true, &HashMap::new());
        let counts = recorder.record_operation(1.5, false, &HashMap::new());

        assert_eq!(counts, OperationCounts { request_count: 2, error_count: 1 });
        assert_eq!(store.latest_value(REQUEST_COUNT), Some(2.0));
        assert_eq!(store.latest_value(ERROR_COUNT), Some(1.0));
        assert_eq!(store.latest_value(OPERATION_DURATION), Some(1.5));
        assert_eq!(store.len(OPERATION_DURATION), 2);
    }

    #[test]
    fn test_domain_wrappers() {
        let (store, recorder) = recorder();
        recorder.record_generation(3.0, true, "gemini");
        recorder.record_audit(1.0, true, "high");
        recorder.record_deployment(12.0, false, "hyperion");

        let deploy = store.latest(DEPLOYMENT_DURATION).unwrap();
        assert_eq!(deploy.value, 12.0);
        assert_eq!(deploy.tags.get("network").map(String::as_str), Some("hyperion"));
        assert_eq!(deploy.tags.get("outcome").map(String::as_str), Some("failure"));
        assert_eq!(store.latest_value(GENERATION_DURATION), Some(3.0));
        assert_eq!(store.latest_value(AUDIT_DURATION), Some(1.0));
        assert_eq!(recorder.counts(), OperationCounts { request_count: 3, error_count: 1 });
    }

    #[test]
    fn test_concurrent_failures_publish_in_order() {
        let (store, recorder) = recorder();
        let recorder = Arc::new(recorder);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        recorder.record_operation(0.01, false, &HashMap::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let errors: Vec<f64> = store
            .since(ERROR_COUNT, chrono::DateTime::<chrono::Utc>::MIN_UTC)
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(errors.len(), 400);
        assert!(errors.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.latest_value(ERROR_COUNT), Some(400.0));
        assert_eq!(recorder.counts(), OperationCounts { request_count: 400, error_count: 400 });
    }

    #[test]
    fn test_timer_finish_and_drop() {
        let (_store, recorder) = recorder();
        recorder.time(HashMap::new()).finish(true);
        {
            let _timer = recorder.time(HashMap::new());
        }
        assert_eq!(recorder.counts(), OperationCounts { request_count: 2, error_count: 1 });
    }
}
