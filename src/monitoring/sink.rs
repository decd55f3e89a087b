//! Metric sinks.
//!
//! Reporting components write through a `MetricsSink`; the concrete
//! variant is chosen by configuration.

use crate::monitoring::metrics::{MetricPoint, MetricsStore};
use crate::monitoring::registry::MetricsRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sink variant identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// The in-process time-series store
    #[default]
    Builtin,
    /// Prometheus registry, mirrored into the store
    Prometheus,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::Builtin => write!(f, "builtin"),
            SinkKind::Prometheus => write!(f, "prometheus"),
        }
    }
}

/// Destination for metric observations.
pub trait MetricsSink: Send + Sync {
    /// Record one observation.
    fn record(&self, point: MetricPoint);

    /// Text exposition of the sink's current state.
    fn export_text(&self) -> String;

    /// Get the sink type.
    fn kind(&self) -> SinkKind;
}

impl MetricsSink for MetricsStore {
    fn record(&self, point: MetricPoint) {
        MetricsStore::record(self, point);
    }

    fn export_text(&self) -> String {
        MetricsStore::export_text(self)
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Builtin
    }
}

/// Sink feeding a Prometheus registry.
///
/// Every point is also recorded into the mirror store, which is what the
/// alert engine and dashboard read from.
pub struct PrometheusSink {
    registry: MetricsRegistry,
    mirror: Arc<MetricsStore>,
}

impl PrometheusSink {
    /// Create a sink that mirrors into `store`.
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self {
            registry: MetricsRegistry::new("chainpulse"),
            mirror: store,
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn record(&self, point: MetricPoint) {
        if point.name.ends_with("duration_seconds") {
            self.registry
                .observe_histogram(&point.name, point.value, &point.tags);
        } else {
            self.registry.set_gauge(&point.name, point.value, &point.tags);
        }
        self.mirror.record(point);
    }

    fn export_text(&self) -> String {
        self.registry.export_prometheus()
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Prometheus
    }
}

/// Create a sink of the configured kind on top of `store`.
pub fn create_sink(kind: SinkKind, store: Arc<MetricsStore>) -> Arc<dyn MetricsSink> {
    match kind {
        SinkKind::Builtin => store as Arc<dyn MetricsSink>,
        SinkKind::Prometheus => Arc::new(PrometheusSink::new(store)),
    }
}
