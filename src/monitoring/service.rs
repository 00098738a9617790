//! Monitoring service
//!
//! Sink for gateway and connection-manager events. Derives per-server health
//! from a trailing window of metric points, raises deduplicated alerts,
//! applies retention and produces dashboard and export views.

use super::log_store::LogStore;
use super::notifications::{EmailChannel, EmailSender, LogEmailSender, NotificationChannel, WebhookChannel};
use super::system::{snapshot, SystemSnapshot};
use super::types::{
    Alert, AlertFilter, Dashboard, DashboardOverview, ExportFormat, LogEntry, LogFilter, LogLevel,
    MetricPoint, MetricType, ServerHealth, Severity,
};
use crate::config::{AlertThresholds, MonitoringConfig};
use crate::error::Result;
use crate::events::{ChannelObserver, EventBus, GatewayEvent};
use crate::pool::CircuitState;
use crate::registry::{HealthStatus, ServerRegistry};
use crate::utils::{millis_between, saturating_sub, SharedClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Server name used for gateway-process alerts
pub const GATEWAY_SERVER_NAME: &str = "gateway";

const RECENT_ALERT_LIMIT: usize = 10;

/// Health status for the given window figures
pub fn classify_health(
    thresholds: &AlertThresholds,
    error_rate: f64,
    availability_rate: f64,
    response_time: f64,
) -> HealthStatus {
    if error_rate > 0.5 {
        HealthStatus::Unhealthy
    } else if response_time > thresholds.response_time
        || error_rate > thresholds.error_rate
        || availability_rate < thresholds.availability_rate
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// What a retention pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub metrics: usize,
    pub logs: usize,
    pub alerts: usize,
}

/// Points of one server inside the health window, with running sums
#[derive(Debug, Default)]
struct HealthWindow {
    points: VecDeque<(DateTime<Utc>, MetricType, f64)>,
    requests: f64,
    errors: f64,
    response_samples: usize,
    latest_response_time: f64,
}

impl HealthWindow {
    fn push(&mut self, point: &MetricPoint) {
        match point.metric_type {
            MetricType::RequestCount => self.requests += point.value,
            MetricType::ErrorCount => self.errors += point.value,
            MetricType::ResponseTime => {
                self.response_samples += 1;
                self.latest_response_time = point.value;
            }
            MetricType::HealthCheck | MetricType::ProcessRestart => return,
        }
        self.points.push_back((point.timestamp, point.metric_type, point.value));
    }

    /// Drop points recorded before `since`
    fn prune(&mut self, since: DateTime<Utc>) {
        while let Some(&(timestamp, metric_type, value)) = self.points.front() {
            if timestamp >= since {
                break;
            }
            self.points.pop_front();
            match metric_type {
                MetricType::RequestCount => self.requests -= value,
                MetricType::ErrorCount => self.errors -= value,
                MetricType::ResponseTime => self.response_samples -= 1,
                MetricType::HealthCheck | MetricType::ProcessRestart => {}
            }
        }
        if self.points.is_empty() {
            *self = Self::default();
        }
    }

    fn latest_response_time(&self) -> Option<f64> {
        (self.response_samples > 0).then_some(self.latest_response_time)
    }
}

#[derive(Default)]
struct MonitoringState {
    /// Full history, kept for retention and export
    metrics: VecDeque<MetricPoint>,
    windows: HashMap<String, HealthWindow>,
    health: BTreeMap<String, ServerHealth>,
    first_seen: HashMap<String, DateTime<Utc>>,
    /// Breaker state per server, per connection
    circuits: HashMap<String, HashMap<String, CircuitState>>,
    alerts: Vec<Alert>,
}

impl MonitoringState {
    fn worst_circuit(&self, server_name: &str) -> CircuitState {
        let Some(circuits) = self.circuits.get(server_name) else {
            return CircuitState::Closed;
        };
        if circuits.values().any(|s| *s == CircuitState::Open) {
            CircuitState::Open
        } else if circuits.values().any(|s| *s == CircuitState::HalfOpen) {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }
}

pub struct MonitoringService {
    config: MonitoringConfig,
    clock: SharedClock,
    registry: Option<Arc<dyn ServerRegistry>>,
    logs: LogStore,
    state: RwLock<MonitoringState>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    started_at: DateTime<Utc>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringService {
    /// Build the service and its configured notification channels
    pub fn new(config: MonitoringConfig, clock: SharedClock) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        if let Some(ref webhook) = config.alerting.webhook {
            match WebhookChannel::new(webhook.clone()) {
                Ok(channel) => channels.push(Arc::new(channel)),
                Err(e) => warn!("Webhook notifications disabled: {}", e),
            }
        }
        if let Some(ref email) = config.alerting.email {
            channels.push(Arc::new(EmailChannel::new(email.clone(), Arc::new(LogEmailSender))));
        }

        let logs = LogStore::new(config.max_log_entries, config.log_dir.as_ref().map(PathBuf::from));
        let started_at = clock.utc();
        Self {
            config,
            clock,
            registry: None,
            logs,
            state: RwLock::new(MonitoringState::default()),
            channels,
            started_at,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Push derived health changes into `registry`
    pub fn with_registry(mut self, registry: Arc<dyn ServerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Replace the e-mail delivery collaborator
    pub fn with_email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        if let Some(ref email) = self.config.alerting.email {
            self.channels.retain(|c| c.name() != "email");
            self.channels.push(Arc::new(EmailChannel::new(email.clone(), sender)));
        }
        self
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Prepare the log directory
    pub async fn init(&self) -> Result<()> {
        self.logs.init().await
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_sub(now, Duration::from_millis(self.config.health_window))
    }

    /// Record a log entry in the buffer, the daily file and the console
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        metadata: Value,
        server_name: Option<&str>,
        connection_id: Option<&str>,
    ) -> LogEntry {
        let entry = LogEntry {
            timestamp: self.clock.utc(),
            level,
            message: message.into(),
            metadata,
            server_name: server_name.map(str::to_string),
            connection_id: connection_id.map(str::to_string),
            stack: (level == LogLevel::Error)
                .then(|| std::backtrace::Backtrace::force_capture().to_string()),
        };

        if self.config.console {
            let server = entry.server_name.as_deref().unwrap_or("-");
            match level {
                LogLevel::Debug => debug!(target: "monitoring", server = %server, "{}", entry.message),
                LogLevel::Info => info!(target: "monitoring", server = %server, "{}", entry.message),
                LogLevel::Warn => warn!(target: "monitoring", server = %server, "{}", entry.message),
                LogLevel::Error => error!(target: "monitoring", server = %server, "{}", entry.message),
            }
        }

        if let Err(e) = self.logs.store(&entry).await {
            warn!("Failed to persist monitoring log entry: {}", e);
        }
        entry
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Vec<LogEntry> {
        self.logs.query(filter).await
    }

    /// Append a metric point and re-derive the server's health
    pub async fn record_metric(
        &self,
        server_name: &str,
        connection_id: Option<&str>,
        metric_type: MetricType,
        value: f64,
        tags: Option<HashMap<String, String>>,
    ) {
        let point = MetricPoint {
            timestamp: self.clock.utc(),
            server_name: server_name.to_string(),
            connection_id: connection_id.map(str::to_string),
            metric_type,
            value,
            tags: tags.unwrap_or_default(),
        };
        self.record_points(server_name, vec![point]).await;
    }

    async fn record_points(&self, server_name: &str, points: Vec<MetricPoint>) {
        let now = self.clock.utc();
        let change = {
            let mut state = self.state.write().await;
            state.first_seen.entry(server_name.to_string()).or_insert(now);
            let window = state.windows.entry(server_name.to_string()).or_default();
            for point in &points {
                window.push(point);
            }
            state.metrics.extend(points);
            self.derive_health(&mut state, server_name, now)
        };
        if let Some((from, to)) = change {
            self.on_health_change(server_name, from, to).await;
        }
    }

    /// Recompute one server's health; returns the status transition, if any
    fn derive_health(
        &self,
        state: &mut MonitoringState,
        server_name: &str,
        now: DateTime<Utc>,
    ) -> Option<(HealthStatus, HealthStatus)> {
        let since = self.window_start(now);
        let window = state.windows.entry(server_name.to_string()).or_default();
        window.prune(since);
        let requests = window.requests.max(0.0);
        let errors = window.errors.max(0.0);
        let latest_response_time = window.latest_response_time();

        let error_rate = if requests > 0.0 { (errors / requests).min(1.0) } else { 0.0 };
        let availability_rate = 1.0 - error_rate;
        let first_seen = state.first_seen.get(server_name).copied().unwrap_or(now);
        let circuit = state.worst_circuit(server_name);

        let health = state
            .health
            .entry(server_name.to_string())
            .or_insert_with(|| ServerHealth::new(server_name, now));
        let previous = health.status;

        if let Some(rt) = latest_response_time {
            health.response_time = rt;
        }
        health.error_rate = error_rate;
        health.availability_rate = availability_rate;
        health.request_count = requests as u64;
        health.error_count = errors as u64;
        health.uptime = millis_between(first_seen, now) / 1000;
        health.circuit_breaker_state = circuit;
        health.last_check = now;
        health.status = classify_health(
            &self.config.thresholds,
            error_rate,
            availability_rate,
            health.response_time,
        );

        (health.status != previous).then_some((previous, health.status))
    }

    async fn on_health_change(&self, server_name: &str, from: HealthStatus, to: HealthStatus) {
        let level = if to == HealthStatus::Healthy { LogLevel::Info } else { LogLevel::Warn };
        self.log(
            level,
            format!("Server health changed: {} -> {}", from, to),
            json!({ "from": from, "to": to }),
            Some(server_name),
            None,
        )
        .await;

        if let Some(ref registry) = self.registry {
            registry.update_health_status(server_name, to).await;
        }

        if to == HealthStatus::Unhealthy {
            let error_rate = self
                .get_server_health(server_name)
                .await
                .map(|h| h.error_rate)
                .unwrap_or_default();
            self.create_alert(
                "server_unhealthy",
                Severity::Critical,
                server_name,
                format!("Server {} is unhealthy (error rate {:.1}%)", server_name, error_rate * 100.0),
                Some(error_rate),
                Some(0.5),
                None,
            )
            .await;
        }
    }

    pub async fn get_server_health(&self, server_name: &str) -> Option<ServerHealth> {
        self.state.read().await.health.get(server_name).cloned()
    }

    pub async fn get_all_server_health(&self) -> Vec<ServerHealth> {
        self.state.read().await.health.values().cloned().collect()
    }

    /// Store and dispatch an alert unless one with the same type and server
    /// was created within the dedup window. Returns the stored alert.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_alert(
        &self,
        alert_type: &str,
        severity: Severity,
        server_name: &str,
        message: impl Into<String>,
        value: Option<f64>,
        threshold: Option<f64>,
        metadata: Option<Value>,
    ) -> Option<Alert> {
        let now = self.clock.utc();
        let dedup_since = saturating_sub(now, Duration::from_millis(self.config.alerting.dedup_window));

        let alert = {
            let mut state = self.state.write().await;
            let duplicate = state.alerts.iter().any(|a| {
                a.alert_type == alert_type && a.server_name == server_name && a.timestamp > dedup_since
            });
            if duplicate {
                debug!("Suppressed duplicate {} alert for {}", alert_type, server_name);
                return None;
            }
            let alert = Alert {
                id: Uuid::new_v4().to_string(),
                timestamp: now,
                alert_type: alert_type.to_string(),
                severity,
                server_name: server_name.to_string(),
                message: message.into(),
                value,
                threshold,
                metadata: metadata.unwrap_or_else(|| json!({})),
                acknowledged: false,
                resolved_at: None,
            };
            state.alerts.push(alert.clone());
            alert
        };

        let level = if severity >= Severity::High { LogLevel::Error } else { LogLevel::Warn };
        self.log(
            level,
            format!("🚨 [ALERT] {} ({}): {}", alert.alert_type, alert.severity, alert.message),
            alert.payload(),
            Some(server_name),
            None,
        )
        .await;

        if self.config.alerting.enabled {
            self.notify(&alert).await;
        }
        Some(alert)
    }

    async fn notify(&self, alert: &Alert) {
        for channel in &self.channels {
            if let Err(e) = channel.send(alert).await {
                warn!("Failed to deliver alert {} via {}: {}", alert.id, channel.name(), e);
            }
        }
    }

    /// Mark an alert acknowledged; false when the id is unknown
    pub async fn acknowledge_alert(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Resolve an alert; the first resolution time is kept
    pub async fn resolve_alert(&self, id: &str) -> bool {
        let now = self.clock.utc();
        let mut state = self.state.write().await;
        match state.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.resolved_at.get_or_insert(now);
                true
            }
            None => false,
        }
    }

    /// Alerts matching `filter`, newest first
    pub async fn get_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state.alerts.iter().filter(|a| filter.matches(a)).cloned().collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// Check every server and the gateway process against the thresholds.
    ///
    /// Returns the number of alerts stored.
    pub async fn run_analysis(&self) -> usize {
        let now = self.clock.utc();
        let thresholds = self.config.thresholds.clone();

        let (servers, changes) = {
            let mut state = self.state.write().await;
            let names: Vec<String> = state.health.keys().cloned().collect();
            let changes: Vec<(String, HealthStatus, HealthStatus)> = names
                .iter()
                .filter_map(|name| {
                    self.derive_health(&mut state, name, now)
                        .map(|(from, to)| (name.clone(), from, to))
                })
                .collect();
            (state.health.values().cloned().collect::<Vec<_>>(), changes)
        };
        for (name, from, to) in changes {
            self.on_health_change(&name, from, to).await;
        }

        let mut raised = 0;
        for health in servers {
            let name = health.server_name.as_str();
            if health.response_time > thresholds.response_time {
                raised += self
                    .create_alert(
                        "high_response_time",
                        Severity::Medium,
                        name,
                        format!(
                            "Response time {:.0}ms exceeds {:.0}ms",
                            health.response_time, thresholds.response_time
                        ),
                        Some(health.response_time),
                        Some(thresholds.response_time),
                        None,
                    )
                    .await
                    .is_some() as usize;
            }
            if health.error_rate > thresholds.error_rate {
                let severity = if health.error_rate > 0.5 { Severity::Critical } else { Severity::High };
                raised += self
                    .create_alert(
                        "high_error_rate",
                        severity,
                        name,
                        format!(
                            "Error rate {:.1}% exceeds {:.1}%",
                            health.error_rate * 100.0,
                            thresholds.error_rate * 100.0
                        ),
                        Some(health.error_rate),
                        Some(thresholds.error_rate),
                        None,
                    )
                    .await
                    .is_some() as usize;
            }
            if health.request_count > 0 && health.availability_rate < thresholds.availability_rate {
                raised += self
                    .create_alert(
                        "low_availability",
                        Severity::High,
                        name,
                        format!(
                            "Availability {:.1}% below {:.1}%",
                            health.availability_rate * 100.0,
                            thresholds.availability_rate * 100.0
                        ),
                        Some(health.availability_rate),
                        Some(thresholds.availability_rate),
                        None,
                    )
                    .await
                    .is_some() as usize;
            }
        }

        let system = self.system_snapshot();
        if system.process_memory_mb > thresholds.memory_usage_mb {
            raised += self
                .create_alert(
                    "high_memory_usage",
                    Severity::Medium,
                    GATEWAY_SERVER_NAME,
                    format!(
                        "Gateway memory {:.0}MB exceeds {:.0}MB",
                        system.process_memory_mb, thresholds.memory_usage_mb
                    ),
                    Some(system.process_memory_mb),
                    Some(thresholds.memory_usage_mb),
                    None,
                )
                .await
                .is_some() as usize;
        }

        if raised > 0 {
            debug!("Analysis raised {} alerts", raised);
        }
        raised
    }

    /// Drop metrics, logs and alerts older than their retention windows
    pub async fn cleanup(&self) -> RetentionReport {
        let now = self.clock.utc();
        let retention = &self.config.retention;
        let metrics_cutoff = saturating_sub(now, days(retention.metrics_days));
        let alerts_cutoff = saturating_sub(now, days(retention.alerts_days));
        let logs_cutoff = saturating_sub(now, days(retention.logs_days));

        let (metrics, alerts) = {
            let mut state = self.state.write().await;
            let before = state.metrics.len();
            state.metrics.retain(|p| p.timestamp >= metrics_cutoff);
            let metrics = before - state.metrics.len();

            let before = state.alerts.len();
            state.alerts.retain(|a| a.timestamp >= alerts_cutoff);
            (metrics, before - state.alerts.len())
        };

        let logs = match self.logs.cleanup(logs_cutoff).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Log retention cleanup failed: {}", e);
                0
            }
        };

        let report = RetentionReport { metrics, logs, alerts };
        info!(
            metrics = report.metrics,
            logs = report.logs,
            alerts = report.alerts,
            "🧹 [MONITORING] retention cleanup"
        );
        report
    }

    pub fn system_snapshot(&self) -> SystemSnapshot {
        snapshot(millis_between(self.started_at, self.clock.utc()) / 1000)
    }

    pub async fn get_dashboard(&self) -> Dashboard {
        let now = self.clock.utc();
        let since = self.window_start(now);
        let day_ago = saturating_sub(now, days(1));
        let state = self.state.read().await;

        let mut overview = DashboardOverview {
            total_servers: state.health.len(),
            ..Default::default()
        };
        for health in state.health.values() {
            match health.status {
                HealthStatus::Healthy => overview.healthy_servers += 1,
                HealthStatus::Degraded => overview.degraded_servers += 1,
                HealthStatus::Unhealthy => overview.unhealthy_servers += 1,
            }
        }

        let (mut total_time, mut samples) = (0.0, 0u64);
        let recent = state
            .windows
            .values()
            .flat_map(|w| w.points.iter())
            .filter(|(timestamp, _, _)| *timestamp >= since);
        for &(_, metric_type, value) in recent {
            match metric_type {
                MetricType::RequestCount => overview.recent_requests += value as u64,
                MetricType::ErrorCount => overview.recent_errors += value as u64,
                MetricType::ResponseTime => {
                    total_time += value;
                    samples += 1;
                }
                _ => {}
            }
        }
        if samples > 0 {
            overview.average_response_time = total_time / samples as f64;
        }
        overview.active_alerts = state.alerts.iter().filter(|a| a.is_active()).count();

        let mut recent_alerts: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| a.timestamp >= day_ago)
            .cloned()
            .collect();
        recent_alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent_alerts.truncate(RECENT_ALERT_LIMIT);

        let servers = state.health.values().cloned().collect();
        drop(state);

        Dashboard {
            generated_at: now,
            overview,
            servers,
            recent_alerts,
            system: self.system_snapshot(),
        }
    }

    /// Export metric points recorded at or after `since`
    pub async fn export_metrics(&self, format: ExportFormat, since: Option<DateTime<Utc>>) -> Result<String> {
        let state = self.state.read().await;
        let points: Vec<&MetricPoint> = state
            .metrics
            .iter()
            .filter(|p| since.map_or(true, |since| p.timestamp >= since))
            .collect();

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&points)?),
            ExportFormat::Csv => {
                let mut out = String::from("timestamp,serverName,connectionId,metricType,value,tags\n");
                for point in points {
                    let tags: BTreeMap<&String, &String> = point.tags.iter().collect();
                    out.push_str(&format!(
                        "{},{},{},{},{},{}\n",
                        point.timestamp.to_rfc3339(),
                        csv_field(&point.server_name),
                        csv_field(point.connection_id.as_deref().unwrap_or("")),
                        point.metric_type,
                        point.value,
                        csv_field(&serde_json::to_string(&tags)?),
                    ));
                }
                Ok(out)
            }
        }
    }

    /// Translate a gateway event into metrics, logs and alerts
    pub async fn handle_event(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::RequestCompleted {
                server_name,
                connection_id,
                method,
                response_time_ms,
                success,
                ..
            } => {
                let now = self.clock.utc();
                let tags = HashMap::from([("method".to_string(), method.clone())]);
                let point = |metric_type, value| MetricPoint {
                    timestamp: now,
                    server_name: server_name.clone(),
                    connection_id: Some(connection_id.clone()),
                    metric_type,
                    value,
                    tags: tags.clone(),
                };
                let mut points = vec![
                    point(MetricType::RequestCount, 1.0),
                    point(MetricType::ResponseTime, *response_time_ms as f64),
                ];
                if !success {
                    points.push(point(MetricType::ErrorCount, 1.0));
                }
                self.record_points(server_name, points).await;
            }
            GatewayEvent::HealthCheckCompleted {
                server_name,
                connection_id,
                healthy,
                response_time_ms,
            } => {
                self.record_metric(
                    server_name,
                    Some(connection_id),
                    MetricType::HealthCheck,
                    if *healthy { 1.0 } else { 0.0 },
                    None,
                )
                .await;
                if !healthy {
                    self.log(
                        LogLevel::Warn,
                        "Health check failed",
                        json!({ "responseTime": response_time_ms }),
                        Some(server_name),
                        Some(connection_id),
                    )
                    .await;
                }
            }
            GatewayEvent::ProcessRestarted {
                server_name,
                connection_id,
                success,
            } => {
                self.record_metric(server_name, Some(connection_id), MetricType::ProcessRestart, 1.0, None)
                    .await;
                if *success {
                    self.log(LogLevel::Info, "Process restarted", json!({}), Some(server_name), Some(connection_id))
                        .await;
                } else {
                    self.create_alert(
                        "process_restart_failed",
                        Severity::Critical,
                        server_name,
                        format!("Failed to restart a process of {}", server_name),
                        None,
                        None,
                        Some(json!({ "connectionId": connection_id })),
                    )
                    .await;
                }
            }
            GatewayEvent::CircuitStateChanged {
                server_name,
                connection_id,
                from,
                to,
            } => {
                {
                    let mut state = self.state.write().await;
                    state
                        .circuits
                        .entry(server_name.clone())
                        .or_default()
                        .insert(connection_id.clone(), *to);
                    let worst = state.worst_circuit(server_name);
                    if let Some(health) = state.health.get_mut(server_name) {
                        health.circuit_breaker_state = worst;
                    }
                }
                self.log(
                    LogLevel::Warn,
                    format!("Circuit breaker {} -> {}", from, to),
                    json!({ "from": from, "to": to }),
                    Some(server_name),
                    Some(connection_id),
                )
                .await;
                if *to == CircuitState::Open {
                    self.create_alert(
                        "circuit_open",
                        Severity::High,
                        server_name,
                        format!("Circuit breaker opened for {}", server_name),
                        None,
                        None,
                        Some(json!({ "connectionId": connection_id })),
                    )
                    .await;
                }
            }
            GatewayEvent::ConnectionFailed { server_name, error } => {
                self.log(
                    LogLevel::Error,
                    format!("Connection failed: {}", error),
                    json!({ "error": error }),
                    Some(server_name),
                    None,
                )
                .await;
                self.create_alert(
                    "connection_failed",
                    Severity::High,
                    server_name,
                    format!("Could not connect to {}: {}", server_name, error),
                    None,
                    None,
                    None,
                )
                .await;
            }
            GatewayEvent::ConnectionCreated {
                server_name,
                connection_id,
            } => {
                self.log(LogLevel::Info, "Connection created", json!({}), Some(server_name), Some(connection_id))
                    .await;
            }
            GatewayEvent::GatewayRequest {
                request_id,
                method,
                server_name,
                success: false,
                retry_count,
                error_code,
                ..
            } => {
                self.log(
                    LogLevel::Warn,
                    format!("Gateway request {} failed", method),
                    json!({
                        "requestId": request_id,
                        "retryCount": retry_count,
                        "errorCode": error_code,
                    }),
                    server_name.as_deref(),
                    None,
                )
                .await;
            }
            GatewayEvent::ShutdownStarted => {
                self.log(LogLevel::Info, "Gateway shutting down", json!({}), None, None).await;
            }
            GatewayEvent::ConnectionStateChanged { .. }
            | GatewayEvent::CacheHit { .. }
            | GatewayEvent::CacheEviction { .. }
            | GatewayEvent::GatewayRequest { .. } => {}
        }
    }

    /// Subscribe to `bus` through a channel drained by a dedicated task
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let (observer, mut events) = ChannelObserver::channel();
        bus.subscribe(observer);

        let service: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(strong) = service.upgrade() else {
                    break;
                };
                strong.handle_event(&event).await;
            }
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(task);
    }

    /// Start the analysis and retention loops
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        let service: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.analysis_interval.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = service.upgrade() else {
                    break;
                };
                strong.run_analysis().await;
            }
        }));

        let service: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.cleanup_interval.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = service.upgrade() else {
                    break;
                };
                strong.cleanup().await;
            }
        }));
        info!("📈 [MONITORING] started ({} notification channels)", self.channels.len());
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}

impl Drop for MonitoringService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn days(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 86_400)
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| c == ',' || c == '"' || c == '\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn service() -> (MonitoringService, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let config = MonitoringConfig {
            console: false,
            ..Default::default()
        };
        (MonitoringService::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_classify_health() {
        let t = AlertThresholds::default();
        assert_eq!(classify_health(&t, 0.0, 1.0, 100.0), HealthStatus::Healthy);
        assert_eq!(classify_health(&t, 0.2, 0.8, 100.0), HealthStatus::Degraded);
        assert_eq!(classify_health(&t, 0.0, 1.0, 9_000.0), HealthStatus::Degraded);
        assert_eq!(classify_health(&t, 0.6, 0.4, 100.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("{\"k\":\"v\"}"), "\"{\"\"k\"\":\"\"v\"\"}\"");
    }

    #[tokio::test]
    async fn test_error_rate_over_window() {
        let (service, clock) = service();
        for _ in 0..4 {
            service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        }
        service.record_metric("fs", None, MetricType::ErrorCount, 1.0, None).await;
        let health = service.get_server_health("fs").await.unwrap();
        assert!((health.error_rate - 0.25).abs() < 1e-9);
        assert_eq!(health.status, HealthStatus::Degraded);

        // Samples age out of the 5-minute window
        clock.advance(std::time::Duration::from_secs(301));
        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        let health = service.get_server_health("fs").await.unwrap();
        assert_eq!(health.error_rate, 0.0);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.uptime, 301);
    }

    #[tokio::test]
    async fn test_acknowledge_and_resolve_are_idempotent() {
        let (service, clock) = service();
        let alert = service
            .create_alert("custom", Severity::Low, "fs", "something", None, None, None)
            .await
            .unwrap();

        assert!(service.acknowledge_alert(&alert.id).await);
        assert!(service.acknowledge_alert(&alert.id).await);
        assert!(service.resolve_alert(&alert.id).await);
        let first = service.get_alerts(&AlertFilter::default()).await[0].resolved_at;
        clock.advance(std::time::Duration::from_secs(10));
        assert!(service.resolve_alert(&alert.id).await);
        let second = service.get_alerts(&AlertFilter::default()).await[0].resolved_at;
        assert_eq!(first, second);
        assert!(!service.resolve_alert("missing").await);

        let active = service
            .get_alerts(&AlertFilter {
                active_only: true,
                ..Default::default()
            })
            .await;
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_retention_drops_old_data() {
        let (service, clock) = service();
        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        service
            .create_alert("custom", Severity::Low, "fs", "old", None, None, None)
            .await
            .unwrap();

        clock.advance(std::time::Duration::from_secs(8 * 24 * 3600));
        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;

        let report = service.cleanup().await;
        assert_eq!(report.metrics, 1);
        assert_eq!(report.alerts, 0);
        assert_eq!(service.get_alerts(&AlertFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_health_window_holds_only_recent_points() {
        let (service, clock) = service();
        for _ in 0..50 {
            service.record_metric("db", None, MetricType::RequestCount, 1.0, None).await;
        }
        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        service.record_metric("fs", None, MetricType::ErrorCount, 1.0, None).await;

        clock.advance(std::time::Duration::from_secs(301));
        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        service.record_metric("fs", None, MetricType::ResponseTime, 42.0, None).await;

        let state = service.state.read().await;
        assert_eq!(state.metrics.len(), 54);
        assert_eq!(state.windows["fs"].points.len(), 2);
        assert_eq!(state.windows["db"].points.len(), 50);
        assert_eq!(state.windows["fs"].latest_response_time(), Some(42.0));
        let health = &state.health["fs"];
        assert_eq!(health.request_count, 1);
        assert_eq!(health.error_count, 0);
        assert_eq!(health.response_time, 42.0);
    }

    #[tokio::test]
    async fn test_unbounded_windows_do_not_overflow() {
        let clock = ManualClock::starting_now();
        let mut config = MonitoringConfig {
            console: false,
            health_window: u64::MAX,
            ..Default::default()
        };
        config.alerting.dedup_window = u64::MAX;
        config.retention.metrics_days = u32::MAX;
        config.retention.logs_days = u32::MAX;
        config.retention.alerts_days = u32::MAX;
        let service = MonitoringService::new(config, clock.clone());

        service.record_metric("fs", None, MetricType::RequestCount, 1.0, None).await;
        service.record_metric("fs", None, MetricType::ErrorCount, 1.0, None).await;
        assert!(service
            .create_alert("custom", Severity::Low, "fs", "first", None, None, None)
            .await
            .is_some());
        clock.advance(std::time::Duration::from_secs(365 * 24 * 3600));
        assert!(service
            .create_alert("custom", Severity::Low, "fs", "again", None, None, None)
            .await
            .is_none());

        let health = service.get_server_health("fs").await.unwrap();
        assert_eq!(health.request_count, 1);
        assert_eq!(service.cleanup().await, RetentionReport::default());
        assert_eq!(service.get_dashboard().await.overview.recent_requests, 1);
    }
}
