//! Service Module
//!
//! Wires the monitoring components together:
//! - ObservabilityService composition root
//! - Dashboard push events

pub mod events;
pub mod observability;

pub use events::{DashboardEvent, MetricsSnapshot};
pub use observability::{
    CurrentMetrics, DashboardBundle, HealthReport, HealthStatus, ObservabilityService,
};
