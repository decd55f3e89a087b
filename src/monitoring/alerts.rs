//! Alerting system for monitoring.
//!
//! Threshold rules evaluated against the latest value of a metric series,
//! with a debounced trigger/resolve lifecycle and bounded history.

use crate::core::{lock, now, Timestamp};
use crate::monitoring::metrics::MetricsStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of alert records retained in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Alert severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Critical
    Critical,
}

/// Alert condition operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCondition {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl AlertCondition {
    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            AlertCondition::GreaterThan => ">",
            AlertCondition::LessThan => "<",
            AlertCondition::GreaterOrEqual => ">=",
            AlertCondition::LessOrEqual => "<=",
            AlertCondition::Equal => "==",
            AlertCondition::NotEqual => "!=",
        }
    }

    /// Apply the operator to `value` and `threshold`.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::GreaterThan => value > threshold,
            AlertCondition::LessThan => value < threshold,
            AlertCondition::GreaterOrEqual => value >= threshold,
            AlertCondition::LessOrEqual => value <= threshold,
            AlertCondition::Equal => (value - threshold).abs() < 1e-10,
            AlertCondition::NotEqual => (value - threshold).abs() >= 1e-10,
        }
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for AlertCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(AlertCondition::GreaterThan),
            "<" => Ok(AlertCondition::LessThan),
            ">=" => Ok(AlertCondition::GreaterOrEqual),
            "<=" => Ok(AlertCondition::LessOrEqual),
            "==" => Ok(AlertCondition::Equal),
            "!=" => Ok(AlertCondition::NotEqual),
            other => Err(format!("unknown alert condition '{}'", other)),
        }
    }
}

/// An alert rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name
    pub name: String,
    /// Metric series to check
    pub metric: String,
    /// Condition
    pub condition: AlertCondition,
    /// Threshold value
    pub threshold: f64,
    /// Seconds a breach must persist before firing; 0 fires immediately
    #[serde(default)]
    pub duration_seconds: u64,
    /// Whether the rule is evaluated
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Severity
    #[serde(default = "severity_default")]
    pub severity: AlertSeverity,
}

fn enabled_default() -> bool {
    true
}

fn severity_default() -> AlertSeverity {
    AlertSeverity::Warning
}

impl AlertRule {
    /// Create a new alert rule.
    pub fn new(name: &str, metric: &str, condition: AlertCondition, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            metric: metric.to_string(),
            condition,
            threshold,
            duration_seconds: 0,
            enabled: true,
            message: format!("{} {} {}", metric, condition, threshold),
            severity: AlertSeverity::Warning,
        }
    }

    /// Set severity.
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set debounce duration.
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// Set message.
    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    /// Check if value breaches this rule.
    pub fn evaluate(&self, value: f64) -> bool {
        self.condition.holds(value, self.threshold)
    }
}

/// Baseline resource and error-rate rules.
pub fn baseline_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new("high_cpu", "system.cpu_percent", AlertCondition::GreaterThan, 80.0)
            .with_duration(60)
            .with_message("CPU usage is above 80%"),
        AlertRule::new("high_memory", "system.memory_percent", AlertCondition::GreaterThan, 85.0)
            .with_duration(60)
            .with_message("Memory usage is above 85%"),
        AlertRule::new("high_disk", "system.disk_percent", AlertCondition::GreaterThan, 90.0)
            .with_severity(AlertSeverity::Critical)
            .with_message("Disk usage is above 90%"),
        AlertRule::new("high_error_count", "app.error_count", AlertCondition::GreaterThan, 10.0)
            .with_message("More than 10 operations have failed"),
    ]
}

/// A single trigger event of a rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert identifier
    pub id: Uuid,
    /// Rule that fired
    pub rule_name: String,
    /// Metric the rule watches
    pub metric: String,
    /// Severity
    pub severity: AlertSeverity,
    /// Rule message
    pub message: String,
    /// Threshold that was crossed
    pub threshold: f64,
    /// Metric value at trigger time
    pub value: f64,
    /// When the alert fired
    pub triggered_at: Timestamp,
    /// Whether the condition has cleared
    pub resolved: bool,
    /// When the condition cleared
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    /// Create from a rule.
    pub fn from_rule(rule: &AlertRule, value: f64, at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            severity: rule.severity,
            message: rule.message.clone(),
            threshold: rule.threshold,
            value,
            triggered_at: at,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Resolve the alert.
    pub fn resolve(&mut self, at: Timestamp) {
        self.resolved = true;
        self.resolved_at = Some(at);
    }

    /// Check if still open.
    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// Alerts that changed state during one evaluation pass.
#[derive(Clone, Debug, Default)]
pub struct EvaluationOutcome {
    /// Newly fired alerts
    pub fired: Vec<Alert>,
    /// Newly resolved alerts
    pub resolved: Vec<Alert>,
}

struct EngineState {
    rules: Vec<AlertRule>,
    /// Open alert per rule name
    active: HashMap<String, Alert>,
    /// Start of the current uninterrupted breach per rule name
    breaching_since: HashMap<String, Timestamp>,
    history: VecDeque<Alert>,
    history_capacity: usize,
}

impl EngineState {
    fn resolve(&mut self, rule_name: &str, at: Timestamp) -> Option<Alert> {
        self.breaching_since.remove(rule_name);
        let mut alert = self.active.remove(rule_name)?;
        alert.resolve(at);
        if let Some(entry) = self.history.iter_mut().rev().find(|a| a.id == alert.id) {
            *entry = alert.clone();
        }
        Some(alert)
    }

    fn push_history(&mut self, alert: Alert) {
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(alert);
    }
}

/// Alert engine owning rules, open alerts and history.
pub struct AlertEngine {
    state: Mutex<EngineState>,
}

impl AlertEngine {
    /// Create an engine with default history retention.
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create an engine retaining at most `capacity` history records.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(EngineState {
                rules: Vec::new(),
                active: HashMap::new(),
                breaching_since: HashMap::new(),
                history: VecDeque::new(),
                history_capacity: capacity.max(1),
            }),
        }
    }

    /// Add an alert rule, replacing any rule with the same name.
    pub fn add_rule(&self, rule: AlertRule) {
        let mut state = lock(&self.state);
        match state.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
    }

    /// Remove a rule by name, resolving its open alert. Returns whether it existed.
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut state = lock(&self.state);
        let before = state.rules.len();
        state.rules.retain(|r| r.name != name);
        let removed = state.rules.len() != before;
        if removed {
            state.resolve(name, now());
        }
        removed
    }

    /// Enable or disable a rule. Disabling resolves its open alert.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut state = lock(&self.state);
        let Some(rule) = state.rules.iter_mut().find(|r| r.name == name) else {
            return false;
        };
        rule.enabled = enabled;
        if !enabled {
            state.resolve(name, now());
        }
        true
    }

    /// Get rules.
    pub fn rules(&self) -> Vec<AlertRule> {
        lock(&self.state).rules.clone()
    }

    /// Evaluate every enabled rule against the store.
    pub fn evaluate(&self, store: &MetricsStore) -> EvaluationOutcome {
        self.evaluate_at(store, now())
    }

    /// Evaluate every enabled rule, treating `at` as the current time.
    pub fn evaluate_at(&self, store: &MetricsStore, at: Timestamp) -> EvaluationOutcome {
        let mut state = lock(&self.state);
        let mut outcome = EvaluationOutcome::default();

        let rules: Vec<AlertRule> = state.rules.iter().filter(|r| r.enabled).cloned().collect();
        for rule in rules {
            let Some(value) = store.latest_value(&rule.metric) else {
                continue;
            };

            if rule.evaluate(value) {
                if state.active.contains_key(&rule.name) {
                    continue;
                }
                let since = *state.breaching_since.entry(rule.name.clone()).or_insert(at);
                let sustained_ms = (at - since).num_milliseconds();
                if sustained_ms < rule.duration_seconds as i64 * 1000 {
                    debug!(rule = %rule.name, value, sustained_ms, "Breach pending debounce");
                    continue;
                }

                let alert = Alert::from_rule(&rule, value, at);
                warn!(
                    rule = %rule.name,
                    metric = %rule.metric,
                    value,
                    threshold = rule.threshold,
                    condition = %rule.condition,
                    "Alert triggered: {}",
                    rule.message
                );
                state.breaching_since.remove(&rule.name);
                state.active.insert(rule.name.clone(), alert.clone());
                state.push_history(alert.clone());
                outcome.fired.push(alert);
            } else if let Some(alert) = state.resolve(&rule.name, at) {
                info!(rule = %rule.name, value, "Alert resolved");
                outcome.resolved.push(alert);
            }
        }

        outcome
    }

    /// Open alerts, oldest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let state = lock(&self.state);
        let mut alerts: Vec<Alert> = state.active.values().cloned().collect();
        alerts.sort_by_key(|a| a.triggered_at);
        alerts
    }

    /// Copy of the retained history, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        lock(&self.state).history.iter().cloned().collect()
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}
