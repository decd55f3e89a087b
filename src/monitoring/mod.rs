//! Monitoring Module
//!
//! Provides observability for chainpulse:
//! - Time-series metric storage and Prometheus export
//! - Threshold alerting
//! - Host resource sampling and operation recording
//! - Structured logging

pub mod alerts;
pub mod logging;
pub mod metrics;
pub mod recorder;
pub mod registry;
pub mod sampler;
pub mod sink;

pub use alerts::{
    baseline_rules, Alert, AlertCondition, AlertEngine, AlertRule, AlertSeverity,
    EvaluationOutcome,
};
pub use logging::{init_tracing, LogFormat, LogLevel, LoggerConfig};
pub use metrics::{MetricPoint, MetricSummary, MetricsStore};
pub use recorder::{OperationCounts, OperationRecorder, OperationTimer};
pub use registry::{Gauge, Histogram, MetricsRegistry};
pub use sampler::{ResourceProbe, SysinfoProbe, SystemSampler};
pub use sink::{create_sink, MetricsSink, PrometheusSink, SinkKind};
