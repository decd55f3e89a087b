//! Observability service.
//!
//! Owns the metric store, alert engine, resource sampler and operation
//! recorder, runs the alert-check and broadcast loops, and serves read-only
//! snapshots of the combined state.

use crate::config::ObservabilityConfig;
use crate::core::{lock, now, Result, Timestamp};
use crate::monitoring::{
    baseline_rules, create_sink, Alert, AlertEngine, AlertRule, AlertSeverity, MetricPoint,
    MetricSummary, MetricsSink, MetricsStore, OperationCounts, OperationRecorder, ResourceProbe,
    SinkKind, SysinfoProbe, SystemSampler,
};
use crate::service::events::{Broadcaster, DashboardEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Seconds covered by the dashboard bundle.
pub const DASHBOARD_WINDOW_SECS: i64 = 3_600;

/// Overall health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No open alerts
    Healthy,
    /// Open alerts, none critical
    Degraded,
    /// At least one critical alert open
    Unhealthy,
}

/// Service health summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Status derived from open alerts
    pub status: HealthStatus,
    /// When the report was built
    pub timestamp: Timestamp,
    /// Seconds since the service was created
    pub uptime_seconds: i64,
    /// Whether the resource sampler thread is alive
    pub sampler_running: bool,
    /// Open alerts of any severity
    pub active_alerts: usize,
    /// Open critical alerts
    pub critical_alerts: usize,
    /// Metric series holding at least one point
    pub tracked_series: usize,
    /// Configured sink variant
    pub sink: SinkKind,
}

/// Latest value of every series plus running operation totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurrentMetrics {
    /// When the values were read
    pub timestamp: Timestamp,
    /// Latest value per series name
    pub values: BTreeMap<String, f64>,
    /// Operation totals since start
    pub counts: OperationCounts,
}

/// Everything a dashboard needs for the last hour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
    /// When the bundle was built
    pub generated_at: Timestamp,
    /// Start of the one-hour window
    pub window_start: Timestamp,
    /// Latest values at build time
    pub current: CurrentMetrics,
    /// Per-series summary over the window
    pub summaries: BTreeMap<String, MetricSummary>,
    /// Alerts open at build time
    pub active_alerts: Vec<Alert>,
    /// Alerts triggered within the window
    pub recent_alerts: Vec<Alert>,
    /// Health at build time
    pub health: HealthReport,
}

#[derive(Serialize)]
struct ExportState {
    exported_at: Timestamp,
    sink: SinkKind,
    counts: OperationCounts,
    metrics: BTreeMap<String, Vec<MetricPoint>>,
    rules: Vec<AlertRule>,
    active_alerts: Vec<Alert>,
    alert_history: Vec<Alert>,
}

struct BackgroundTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Composition root for metrics, alerting and sampling.
pub struct ObservabilityService {
    config: ObservabilityConfig,
    store: Arc<MetricsStore>,
    sink: Arc<dyn MetricsSink>,
    alerts: Arc<AlertEngine>,
    sampler: SystemSampler,
    recorder: Arc<OperationRecorder>,
    events: broadcast::Sender<DashboardEvent>,
    tasks: Mutex<Option<BackgroundTasks>>,
    started_at: Timestamp,
}

impl ObservabilityService {
    /// Build the service with the `sysinfo` resource probe.
    pub fn new(config: ObservabilityConfig) -> Result<Self> {
        Self::with_probe(config, Box::new(SysinfoProbe::new()))
    }

    /// Build the service with a custom resource probe.
    pub fn with_probe(config: ObservabilityConfig, probe: Box<dyn ResourceProbe>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MetricsStore::with_capacity(config.store_capacity));
        let sink = create_sink(config.sink, Arc::clone(&store));

        let alerts = Arc::new(AlertEngine::with_history_capacity(
            config.alert_history_capacity,
        ));
        if config.baseline_rules {
            for rule in baseline_rules() {
                alerts.add_rule(rule);
            }
        }
        for rule in &config.rules {
            alerts.add_rule(rule.clone());
        }

        let sampler = SystemSampler::with_probe(Arc::clone(&sink), config.sampler_interval(), probe);
        let recorder = Arc::new(OperationRecorder::new(Arc::clone(&sink)));
        let (events, _) = broadcast::channel(config.event_buffer);

        info!(
            sink = %config.sink,
            rules = alerts.rules().len(),
            store_capacity = config.store_capacity,
            "Observability service created"
        );

        Ok(Self {
            config,
            store,
            sink,
            alerts,
            sampler,
            recorder,
            events,
            tasks: Mutex::new(None),
            started_at: now(),
        })
    }

    /// Start the sampler and the alert-check and broadcast loops.
    ///
    /// Must be called inside a Tokio runtime. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        if tasks.is_some() {
            return Ok(());
        }

        self.sampler.start()?;
        let (shutdown, stop) = watch::channel(false);

        let alerts = Arc::clone(&self.alerts);
        let store = Arc::clone(&self.store);
        let alert_loop = spawn_periodic(self.config.alert_interval(), stop.clone(), move || {
            let outcome = alerts.evaluate(&store);
            if !outcome.fired.is_empty() || !outcome.resolved.is_empty() {
                debug!(
                    fired = outcome.fired.len(),
                    resolved = outcome.resolved.len(),
                    "Alert check complete"
                );
            }
        });

        let mut broadcaster = Broadcaster::new(
            Arc::clone(&self.store),
            Arc::clone(&self.alerts),
            Arc::clone(&self.recorder),
            self.events.clone(),
        );
        let broadcast_loop = spawn_periodic(self.config.broadcast_interval(), stop, move || {
            broadcaster.tick();
        });

        *tasks = Some(BackgroundTasks {
            shutdown,
            handles: vec![alert_loop, broadcast_loop],
        });
        info!(
            alert_interval_secs = self.config.alert_interval_secs,
            broadcast_interval_secs = self.config.broadcast_interval_secs,
            "Observability service started"
        );
        Ok(())
    }

    /// Whether the background loops are running.
    pub fn is_running(&self) -> bool {
        lock(&self.tasks).is_some()
    }

    /// Stop all loops and the sampler. Stopping a stopped service is a no-op.
    pub async fn shutdown(&self) {
        let tasks = lock(&self.tasks).take();
        let Some(tasks) = tasks else {
            return;
        };
        let _ = tasks.shutdown.send(true);
        for handle in tasks.handles {
            let _ = handle.await;
        }
        self.sampler.stop();
        info!("Observability service stopped");
    }

    /// Receive dashboard events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Recorder for instrumented pipeline stages.
    pub fn recorder(&self) -> Arc<OperationRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Take one resource sample now.
    pub fn sample_now(&self) -> usize {
        self.sampler.sample_once()
    }

    /// Latest value of every series.
    pub fn current_metrics(&self) -> CurrentMetrics {
        let values = self
            .store
            .names()
            .into_iter()
            .filter_map(|name| self.store.latest_value(&name).map(|v| (name, v)))
            .collect();
        CurrentMetrics {
            timestamp: now(),
            values,
            counts: self.recorder.counts(),
        }
    }

    /// Open alerts.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    /// Copy of the installed alert rules.
    pub fn rules(&self) -> Vec<AlertRule> {
        self.alerts.rules()
    }

    /// Copy of the alert history, oldest first.
    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.history()
    }

    #[cfg(test)]
    fn check_alerts(&self) {
        self.alerts.evaluate(&self.store);
    }

    /// Health summary derived from open alerts.
    pub fn health(&self) -> HealthReport {
        let active = self.alerts.active_alerts();
        let critical = active
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count();
        let status = if critical > 0 {
            HealthStatus::Unhealthy
        } else if !active.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let at = now();

        HealthReport {
            status,
            timestamp: at,
            uptime_seconds: (at - self.started_at).num_seconds(),
            sampler_running: self.sampler.is_running(),
            active_alerts: active.len(),
            critical_alerts: critical,
            tracked_series: self.store.names().len(),
            sink: self.sink.kind(),
        }
    }

    /// One-hour dashboard bundle.
    pub fn dashboard(&self) -> DashboardBundle {
        let generated_at = now();
        let window_start = generated_at - chrono::Duration::seconds(DASHBOARD_WINDOW_SECS);
        let summaries = self
            .store
            .names()
            .into_iter()
            .filter_map(|name| self.store.summary(&name, window_start).map(|s| (name, s)))
            .collect();
        let recent_alerts = self
            .alerts
            .history()
            .into_iter()
            .filter(|a| a.triggered_at >= window_start)
            .collect();

        DashboardBundle {
            generated_at,
            window_start,
            current: self.current_metrics(),
            summaries,
            active_alerts: self.alerts.active_alerts(),
            recent_alerts,
            health: self.health(),
        }
    }

    /// Full in-memory state as pretty JSON.
    pub fn export_json(&self) -> Result<String> {
        let state = ExportState {
            exported_at: now(),
            sink: self.sink.kind(),
            counts: self.recorder.counts(),
            metrics: self.store.snapshot(),
            rules: self.alerts.rules(),
            active_alerts: self.alerts.active_alerts(),
            alert_history: self.alerts.history(),
        };
        Ok(serde_json::to_string_pretty(&state)?)
    }

    /// Text exposition of the configured sink.
    pub fn export_text(&self) -> String {
        self.sink.export_text()
    }
}

/// Run `tick` every `period` until `stop` flips or its sender is dropped.
fn spawn_periodic<F>(period: Duration, mut stop: watch::Receiver<bool>, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => tick(),
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, Result};
    use crate::monitoring::recorder::ERROR_COUNT;
    use crate::monitoring::sampler::{CPU_PERCENT, DISK_PERCENT};
    use crate::monitoring::AlertCondition;

    struct StaticProbe {
        cpu: f64,
        disk: f64,
    }

    impl ResourceProbe for StaticProbe {
        fn refresh(&mut self) -> Result<()> {
            Ok(())
        }

        fn cpu_percent(&mut self) -> Result<f64> {
            Ok(self.cpu)
        }

        fn memory(&mut self) -> Result<(f64, u64)> {
            Ok((40.0, 4 * 1024 * 1024))
        }

        fn disk_percent(&mut self) -> Result<f64> {
            Ok(self.disk)
        }

        fn network_bytes(&mut self) -> Result<(u64, u64)> {
            Err(Error::SamplingFailed("no interfaces".into()))
        }
    }

    fn service(config: ObservabilityConfig, cpu: f64, disk: f64) -> ObservabilityService {
        ObservabilityService::with_probe(config, Box::new(StaticProbe { cpu, disk })).unwrap()
    }

    fn fast_config() -> ObservabilityConfig {
        ObservabilityConfig {
            sampler_interval_secs: 1,
            alert_interval_secs: 1,
            broadcast_interval_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_rules_installed() {
        let svc = service(ObservabilityConfig::default(), 10.0, 10.0);
        let names: Vec<String> = svc.rules().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["high_cpu", "high_memory", "high_disk", "high_error_count"]);

        let bare = service(
            ObservabilityConfig {
                baseline_rules: false,
                ..Default::default()
            },
            10.0,
            10.0,
        );
        assert!(bare.rules().is_empty());
    }

    #[test]
    fn test_snapshots_are_detached() {
        let svc = service(ObservabilityConfig::default(), 10.0, 10.0);
        let mut rules = svc.rules();
        rules.clear();
        rules.push(AlertRule::new("extra", CPU_PERCENT, AlertCondition::Equal, 0.0));
        assert_eq!(svc.rules().len(), 4);

        let mut current = svc.current_metrics();
        current.values.insert(CPU_PERCENT.to_string(), 100.0);
        assert!(svc.current_metrics().values.is_empty());
        assert!(svc.alert_history().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ObservabilityConfig {
            store_capacity: 0,
            ..Default::default()
        };
        assert!(ObservabilityService::with_probe(config, Box::new(StaticProbe { cpu: 0.0, disk: 0.0 })).is_err());
    }

    #[test]
    fn test_current_metrics_and_health() {
        let svc = service(ObservabilityConfig::default(), 12.5, 95.0);
        assert_eq!(svc.health().status, HealthStatus::Healthy);

        assert_eq!(svc.sample_now(), 4);
        let current = svc.current_metrics();
        assert_eq!(current.values[CPU_PERCENT], 12.5);
        assert_eq!(current.values[DISK_PERCENT], 95.0);

        svc.check_alerts();
        let health = svc.health();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.critical_alerts, 1);
        assert!(!health.sampler_running);
    }

    #[test]
    fn test_error_count_degrades_health() {
        let svc = service(ObservabilityConfig::default(), 1.0, 1.0);
        let recorder = svc.recorder();
        for _ in 0..11 {
            recorder.record_deployment(2.0, false, "hyperion");
        }
        assert_eq!(svc.current_metrics().values[ERROR_COUNT], 11.0);

        svc.check_alerts();
        let active = svc.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].rule_name, "high_error_count");
        assert_eq!(svc.health().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_dashboard_bundle() {
        let config = ObservabilityConfig {
            baseline_rules: false,
            rules: vec![AlertRule::new("busy", CPU_PERCENT, AlertCondition::GreaterThan, 50.0)],
            ..Default::default()
        };
        let svc = service(config, 75.0, 10.0);
        svc.sample_now();
        svc.sample_now();
        svc.check_alerts();

        let bundle = svc.dashboard();
        assert_eq!(bundle.summaries[CPU_PERCENT].count, 2);
        assert_eq!(bundle.summaries[CPU_PERCENT].mean, 75.0);
        assert_eq!(bundle.active_alerts.len(), 1);
        assert_eq!(bundle.recent_alerts.len(), 1);
        assert_eq!(svc.alert_history().len(), 1);
        assert_eq!(bundle.health.status, HealthStatus::Degraded);
        assert!(bundle.window_start < bundle.generated_at);
    }

    #[test]
    fn test_export_json() {
        let svc = service(ObservabilityConfig::default(), 20.0, 30.0);
        svc.sample_now();
        svc.recorder().record_generation(1.5, true, "gpt");

        let raw = tokio_test::assert_ok!(svc.export_json());
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["sink"], "builtin");
        assert_eq!(json["counts"]["request_count"], 1);
        assert_eq!(json["rules"].as_array().unwrap().len(), 4);
        assert!(json["metrics"][CPU_PERCENT].is_array());
    }

    #[test]
    fn test_prometheus_export() {
        let config = ObservabilityConfig {
            sink: SinkKind::Prometheus,
            ..Default::default()
        };
        let svc = service(config, 20.0, 30.0);
        svc.recorder().record_audit(0.25, true, "low");

        let text = svc.export_text();
        assert!(text.contains("_bucket"));
        assert_eq!(svc.health().sink, SinkKind::Prometheus);
        // Mirrored into the store so alerting still sees it
        assert_eq!(svc.current_metrics().values["app.request_count"], 1.0);
    }

    #[tokio::test]
    async fn test_start_broadcast_and_shutdown() {
        let config = ObservabilityConfig {
            baseline_rules: false,
            rules: vec![
                AlertRule::new("cpu_now", CPU_PERCENT, AlertCondition::GreaterThan, 90.0)
                    .with_severity(AlertSeverity::Critical),
            ],
            ..fast_config()
        };
        let svc = service(config, 99.0, 10.0);
        let mut events = svc.subscribe();

        svc.start().unwrap();
        svc.start().unwrap();
        assert!(svc.is_running());

        let mut saw_metrics = false;
        let mut saw_alert = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !(saw_metrics && saw_alert) && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
                Ok(Ok(DashboardEvent::Metrics(_))) => saw_metrics = true,
                Ok(Ok(DashboardEvent::Alert(alert))) => {
                    assert_eq!(alert.rule_name, "cpu_now");
                    saw_alert = true;
                }
                _ => {}
            }
        }
        assert!(saw_metrics);
        assert!(saw_alert);

        svc.shutdown().await;
        assert!(!svc.is_running());
        assert!(!svc.health().sampler_running);
        svc.shutdown().await;
    }
}
