//! Dashboard push events.

use crate::core::{now, Timestamp};
use crate::monitoring::sampler::{CPU_PERCENT, MEMORY_PERCENT};
use crate::monitoring::{Alert, AlertEngine, MetricsStore, OperationRecorder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Headline numbers pushed on every broadcast tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub timestamp: Timestamp,
    /// Latest CPU sample, 0 before the first one
    pub cpu_percent: f64,
    /// Latest memory sample, 0 before the first one
    pub memory_percent: f64,
    /// Operations reported so far
    pub request_count: u64,
    /// Failed operations reported so far
    pub error_count: u64,
}

/// Event delivered to dashboard subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// Periodic metrics snapshot
    Metrics(MetricsSnapshot),
    /// An alert that has not been pushed before
    Alert(Alert),
}

/// Publishes dashboard events.
///
/// Each active alert is pushed at most once; the set of pushed ids lives only
/// in memory.
pub(crate) struct Broadcaster {
    store: Arc<MetricsStore>,
    alerts: Arc<AlertEngine>,
    recorder: Arc<OperationRecorder>,
    events: broadcast::Sender<DashboardEvent>,
    announced: HashSet<Uuid>,
}

impl Broadcaster {
    pub(crate) fn new(
        store: Arc<MetricsStore>,
        alerts: Arc<AlertEngine>,
        recorder: Arc<OperationRecorder>,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Self {
        Self {
            store,
            alerts,
            recorder,
            events,
            announced: HashSet::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let counts = self.recorder.counts();
        MetricsSnapshot {
            timestamp: now(),
            cpu_percent: self.store.latest_value(CPU_PERCENT).unwrap_or(0.0),
            memory_percent: self.store.latest_value(MEMORY_PERCENT).unwrap_or(0.0),
            request_count: counts.request_count,
            error_count: counts.error_count,
        }
    }

    /// Push one metrics snapshot and every unannounced active alert.
    /// Returns the number of events published.
    pub(crate) fn tick(&mut self) -> usize {
        let mut published = 1;
        // Fails only when nobody is subscribed
        let _ = self.events.send(DashboardEvent::Metrics(self.snapshot()));

        let active = self.alerts.active_alerts();
        for alert in &active {
            if self.announced.insert(alert.id) {
                debug!(alert_id = %alert.id, rule = %alert.rule_name, "Broadcasting alert");
                let _ = self.events.send(DashboardEvent::Alert(alert.clone()));
                published += 1;
            }
        }

        // Resolved alerts never reappear under the same id
        let live: HashSet<Uuid> = active.iter().map(|a| a.id).collect();
        self.announced.retain(|id| live.contains(id));
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{create_sink, AlertCondition, AlertRule, MetricPoint, SinkKind};
    use std::collections::HashMap;

    fn fixture() -> (Arc<MetricsStore>, Arc<AlertEngine>, Arc<OperationRecorder>) {
        let store = Arc::new(MetricsStore::new());
        let alerts = Arc::new(AlertEngine::new());
        let recorder = Arc::new(OperationRecorder::new(create_sink(
            SinkKind::Builtin,
            store.clone(),
        )));
        (store, alerts, recorder)
    }

    #[test]
    fn test_alert_broadcast_once() {
        let (store, alerts, recorder) = fixture();
        alerts.add_rule(AlertRule::new("cpu", CPU_PERCENT, AlertCondition::GreaterThan, 80.0));
        let (tx, mut rx) = broadcast::channel(16);
        let mut broadcaster = Broadcaster::new(store.clone(), alerts.clone(), recorder, tx);

        store.record(MetricPoint::new(CPU_PERCENT, 95.0));
        alerts.evaluate(&store);

        assert_eq!(broadcaster.tick(), 2);
        assert_eq!(broadcaster.tick(), 1);

        let mut alert_events = 0;
        let mut metric_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DashboardEvent::Alert(alert) => {
                    assert_eq!(alert.rule_name, "cpu");
                    alert_events += 1;
                }
                DashboardEvent::Metrics(snapshot) => {
                    assert_eq!(snapshot.cpu_percent, 95.0);
                    metric_events += 1;
                }
            }
        }
        assert_eq!(alert_events, 1);
        assert_eq!(metric_events, 2);
    }

    #[test]
    fn test_retrigger_is_announced_again() {
        let (store, alerts, recorder) = fixture();
        alerts.add_rule(AlertRule::new("cpu", CPU_PERCENT, AlertCondition::GreaterThan, 80.0));
        let (tx, _rx) = broadcast::channel(16);
        let mut broadcaster = Broadcaster::new(store.clone(), alerts.clone(), recorder, tx);

        store.record(MetricPoint::new(CPU_PERCENT, 95.0));
        alerts.evaluate(&store);
        assert_eq!(broadcaster.tick(), 2);

        store.record(MetricPoint::new(CPU_PERCENT, 10.0));
        alerts.evaluate(&store);
        assert_eq!(broadcaster.tick(), 1);

        store.record(MetricPoint::new(CPU_PERCENT, 99.0));
        alerts.evaluate(&store);
        assert_eq!(broadcaster.tick(), 2);
    }

    #[test]
    fn test_snapshot_counts() {
        let (store, alerts, recorder) = fixture();
        recorder.record_operation(0.5, true, &HashMap::new());
        recorder.record_operation(0.7, false, &HashMap::new());
        let (tx, _rx) = broadcast::channel(4);
        let broadcaster = Broadcaster::new(store, alerts, recorder, tx);

        let snapshot = broadcaster.snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.cpu_percent, 0.0);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = DashboardEvent::Metrics(MetricsSnapshot {
            timestamp: now(),
            cpu_percent: 1.0,
            memory_percent: 2.0,
            request_count: 3,
            error_count: 0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "metrics");
        assert_eq!(json["request_count"], 3);
    }
}
