//! Monitoring Service Tests
//!
//! Tests cover:
//! - Alert deduplication, acknowledgement and resolution
//! - Health derivation from request events and registry updates
//! - Webhook and e-mail notification delivery
//! - Daily log files, metric export and retention
//! - The dashboard and event wiring through `GatewayRuntime`

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use mcp_gateway::config::{Config, EmailConfig, MonitoringConfig, ServerConfig, WebhookConfig};
use mcp_gateway::error::Result;
use mcp_gateway::events::GatewayEvent;
use mcp_gateway::monitoring::{
    log_file_name, AlertFilter, EmailMessage, EmailSender, ExportFormat, LogFilter, LogLevel, MetricType,
    MonitoringService, Severity,
};
use mcp_gateway::pool::CircuitState;
use mcp_gateway::registry::{HealthStatus, RegisteredServer, ServerRegistry, StaticServerRegistry};
use mcp_gateway::routing::{ExecuteOptions, McpRequestContext};
use mcp_gateway::testing::{FakeBackend, FakeTransportFactory, ManualClock};
use mcp_gateway::utils::Clock;
use mcp_gateway::GatewayRuntime;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quiet_config() -> MonitoringConfig {
    MonitoringConfig {
        console: false,
        ..Default::default()
    }
}

fn service(config: MonitoringConfig) -> (MonitoringService, Arc<ManualClock>) {
    let clock = ManualClock::starting_now();
    (MonitoringService::new(config, clock.clone()), clock)
}

fn completed(server: &str, success: bool, response_time_ms: u64) -> GatewayEvent {
    GatewayEvent::RequestCompleted {
        server_name: server.to_string(),
        connection_id: format!("{}-conn", server),
        method: "file.read".to_string(),
        response_time_ms,
        success,
        attempts: 1,
        error_code: (!success).then(|| "BACKEND_ERROR".to_string()),
    }
}

fn registered(name: &str) -> RegisteredServer {
    RegisteredServer {
        name: name.to_string(),
        capabilities: vec!["file.*".to_string()],
        category: None,
        priority: 1,
        critical: false,
        health: HealthStatus::Healthy,
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Test: the same (type, server) alert is stored once per dedup window
#[tokio::test]
async fn test_alert_deduplication() {
    let (monitoring, clock) = service(quiet_config());

    let first = monitoring
        .create_alert("high_error_rate", Severity::High, "alpha", "errors", Some(0.3), Some(0.1), None)
        .await;
    assert!(first.is_some());
    for _ in 0..3 {
        let duplicate = monitoring
            .create_alert("high_error_rate", Severity::High, "alpha", "errors", Some(0.4), Some(0.1), None)
            .await;
        assert!(duplicate.is_none());
    }

    // Other servers and other types are independent
    assert!(monitoring
        .create_alert("high_error_rate", Severity::High, "beta", "errors", None, None, None)
        .await
        .is_some());
    assert!(monitoring
        .create_alert("circuit_open", Severity::High, "alpha", "open", None, None, None)
        .await
        .is_some());

    let alpha = AlertFilter {
        server_name: Some("alpha".to_string()),
        ..Default::default()
    };
    assert_eq!(monitoring.get_alerts(&alpha).await.len(), 2);

    clock.advance(Duration::from_millis(300_001));
    assert!(monitoring
        .create_alert("high_error_rate", Severity::High, "alpha", "errors", None, None, None)
        .await
        .is_some());
    assert_eq!(monitoring.get_alerts(&alpha).await.len(), 3);
}

/// Test: acknowledge and resolve are idempotent and keep the first resolution time
#[tokio::test]
async fn test_acknowledge_and_resolve() {
    let (monitoring, clock) = service(quiet_config());
    let alert = monitoring
        .create_alert("circuit_open", Severity::High, "alpha", "open", None, None, None)
        .await
        .unwrap();

    assert!(monitoring.acknowledge_alert(&alert.id).await);
    assert!(monitoring.acknowledge_alert(&alert.id).await);
    assert!(monitoring.resolve_alert(&alert.id).await);
    let resolved_at = monitoring.get_alerts(&AlertFilter::default()).await[0].resolved_at;
    assert!(resolved_at.is_some());

    clock.advance(Duration::from_secs(60));
    assert!(monitoring.resolve_alert(&alert.id).await);
    let stored = &monitoring.get_alerts(&AlertFilter::default()).await[0];
    assert!(stored.acknowledged);
    assert_eq!(stored.resolved_at, resolved_at);

    assert!(!monitoring.acknowledge_alert("missing").await);
    assert!(!monitoring.resolve_alert("missing").await);

    let active = AlertFilter {
        active_only: true,
        ..Default::default()
    };
    assert!(monitoring.get_alerts(&active).await.is_empty());
}

/// Test: request outcomes drive health status, registry updates and the unhealthy alert
#[tokio::test]
async fn test_health_derivation_updates_registry() {
    let registry = Arc::new(StaticServerRegistry::from_servers([registered("alpha")]));
    let clock = ManualClock::starting_now();
    let monitoring = MonitoringService::new(quiet_config(), clock.clone()).with_registry(registry.clone());

    for _ in 0..4 {
        monitoring.handle_event(&completed("alpha", true, 20)).await;
    }
    assert_eq!(
        monitoring.get_server_health("alpha").await.unwrap().status,
        HealthStatus::Healthy
    );

    monitoring.handle_event(&completed("alpha", false, 20)).await;
    let health = monitoring.get_server_health("alpha").await.unwrap();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!((health.error_rate - 0.2).abs() < 1e-9);
    assert_eq!(registry.get_health_status("alpha").await, Some(HealthStatus::Degraded));

    for _ in 0..4 {
        monitoring.handle_event(&completed("alpha", false, 20)).await;
    }
    let health = monitoring.get_server_health("alpha").await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.request_count, 9);
    assert_eq!(health.error_count, 5);
    assert_eq!(registry.get_health_status("alpha").await, Some(HealthStatus::Unhealthy));

    let unhealthy: Vec<_> = monitoring
        .get_alerts(&AlertFilter::default())
        .await
        .into_iter()
        .filter(|a| a.alert_type == "server_unhealthy")
        .collect();
    assert_eq!(unhealthy.len(), 1);
    assert_eq!(unhealthy[0].severity, Severity::Critical);

    // Once the failures leave the window the server recovers
    clock.advance(Duration::from_millis(300_001));
    monitoring.run_analysis().await;
    assert_eq!(
        monitoring.get_server_health("alpha").await.unwrap().status,
        HealthStatus::Healthy
    );
    assert_eq!(registry.get_health_status("alpha").await, Some(HealthStatus::Healthy));
}

/// Test: slow responses degrade a server and trigger a response-time alert
#[tokio::test]
async fn test_analysis_flags_slow_server() {
    let (monitoring, _clock) = service(quiet_config());
    monitoring.handle_event(&completed("slow", true, 7_500)).await;

    assert_eq!(
        monitoring.get_server_health("slow").await.unwrap().status,
        HealthStatus::Degraded
    );
    monitoring.run_analysis().await;

    let alerts = monitoring
        .get_alerts(&AlertFilter {
            server_name: Some("slow".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "high_response_time");
    assert_eq!(alerts[0].value, Some(7_500.0));
    assert_eq!(alerts[0].threshold, Some(5_000.0));
}

/// Test: circuit and restart events become alerts
#[tokio::test]
async fn test_connection_events_raise_alerts() {
    let (monitoring, _clock) = service(quiet_config());
    monitoring.handle_event(&completed("alpha", true, 5)).await;

    monitoring
        .handle_event(&GatewayEvent::CircuitStateChanged {
            server_name: "alpha".to_string(),
            connection_id: "alpha-1".to_string(),
            from: CircuitState::Closed,
            to: CircuitState::Open,
        })
        .await;
    monitoring
        .handle_event(&GatewayEvent::ProcessRestarted {
            server_name: "alpha".to_string(),
            connection_id: "alpha-1".to_string(),
            success: false,
        })
        .await;
    monitoring
        .handle_event(&GatewayEvent::ConnectionFailed {
            server_name: "beta".to_string(),
            error: "spawn failed".to_string(),
        })
        .await;

    let mut types: Vec<String> = monitoring
        .get_alerts(&AlertFilter::default())
        .await
        .into_iter()
        .map(|a| a.alert_type)
        .collect();
    types.sort();
    assert_eq!(types, vec!["circuit_open", "connection_failed", "process_restart_failed"]);
    assert_eq!(
        monitoring.get_server_health("alpha").await.unwrap().circuit_breaker_state,
        CircuitState::Open
    );

    let errors = monitoring
        .get_logs(&LogFilter {
            level: Some(LogLevel::Error),
            server_name: Some("beta".to_string()),
            ..Default::default()
        })
        .await;
    assert!(errors.iter().any(|e| e.message.contains("spawn failed") && e.stack.is_some()));
}

/// Test: alerts are POSTed to the configured webhook with its headers
#[tokio::test]
async fn test_webhook_notification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = quiet_config();
    config.alerting.webhook = Some(WebhookConfig {
        url: format!("{}/alerts", server.uri()),
        headers: HashMap::from([("x-api-key".to_string(), "secret".to_string())]),
        timeout: 2_000,
    });
    let (monitoring, _clock) = service(config);
    assert_eq!(monitoring.channel_names(), vec!["webhook".to_string()]);

    monitoring
        .create_alert("circuit_open", Severity::High, "alpha", "Circuit breaker opened", None, None, None)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["type"], "circuit_open");
    assert_eq!(body["severity"], "high");
    assert_eq!(body["serverName"], "alpha");
    assert_eq!(body["message"], "Circuit breaker opened");
}

/// Test: a failing webhook does not lose the alert, and disabled alerting sends nothing
#[tokio::test]
async fn test_webhook_failure_and_disabled_alerting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = quiet_config();
    config.alerting.webhook = Some(WebhookConfig {
        url: server.uri(),
        headers: HashMap::new(),
        timeout: 2_000,
    });
    let (monitoring, _clock) = service(config.clone());
    assert!(monitoring
        .create_alert("circuit_open", Severity::High, "alpha", "open", None, None, None)
        .await
        .is_some());
    assert_eq!(monitoring.get_alerts(&AlertFilter::default()).await.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    config.alerting.enabled = false;
    let (silent, _clock) = service(config);
    assert!(silent
        .create_alert("circuit_open", Severity::High, "alpha", "open", None, None, None)
        .await
        .is_some());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

/// Test: e-mail alerts are rendered and handed to the sender
#[tokio::test]
async fn test_email_notification() {
    let mut config = quiet_config();
    config.alerting.email = Some(EmailConfig {
        from: "gateway@example.com".to_string(),
        to: vec!["ops@example.com".to_string()],
        subject_prefix: None,
    });
    let sender = Arc::new(RecordingSender::default());
    let clock = ManualClock::starting_now();
    let monitoring = MonitoringService::new(config, clock).with_email_sender(sender.clone());
    assert_eq!(monitoring.channel_names(), vec!["email".to_string()]);

    monitoring
        .create_alert("low_availability", Severity::High, "alpha", "Availability 80.0%", Some(0.8), Some(0.95), None)
        .await
        .unwrap();

    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[MCP Gateway] HIGH alert: low_availability on alpha");
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    assert!(sent[0].body.contains("Threshold: 0.95"));
}

/// Test: log entries are appended to the day's file and filtered on query
#[tokio::test]
async fn test_log_files_and_query() {
    let dir = TempDir::new().unwrap();
    let mut config = quiet_config();
    config.log_dir = Some(dir.path().join("logs").to_string_lossy().into_owned());
    let (monitoring, clock) = service(config);
    monitoring.init().await.unwrap();

    monitoring
        .log(LogLevel::Info, "first", json!({}), Some("alpha"), None)
        .await;
    monitoring
        .log(LogLevel::Warn, "second", json!({"k": 1}), Some("beta"), Some("beta-1"))
        .await;
    monitoring
        .log(LogLevel::Debug, "third", json!({}), Some("alpha"), None)
        .await;

    let file = dir
        .path()
        .join("logs")
        .join(log_file_name(clock.utc().date_naive()));
    let contents = tokio::fs::read_to_string(&file).await.unwrap();
    assert_eq!(contents.lines().count(), 3);
    let second: Value = serde_json::from_str(contents.lines().nth(1).unwrap()).unwrap();
    assert_eq!(second["message"], "second");
    assert_eq!(second["level"], "warn");

    let warnings = monitoring
        .get_logs(&LogFilter {
            level: Some(LogLevel::Warn),
            ..Default::default()
        })
        .await;
    assert_eq!(warnings.len(), 1);

    let alpha = monitoring
        .get_logs(&LogFilter {
            server_name: Some("alpha".to_string()),
            limit: Some(1),
            ..Default::default()
        })
        .await;
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].message, "third");
}

/// Test: CSV and JSON exports cover the recorded metric points
#[tokio::test]
async fn test_metric_export() {
    let (monitoring, clock) = service(quiet_config());
    let start = clock.utc();
    monitoring
        .record_metric("alpha", Some("alpha-1"), MetricType::ResponseTime, 12.0, None)
        .await;
    monitoring
        .record_metric(
            "alpha",
            None,
            MetricType::RequestCount,
            1.0,
            Some(HashMap::from([("method".to_string(), "file.read".to_string())])),
        )
        .await;

    let csv = monitoring.export_metrics(ExportFormat::Csv, None).await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "timestamp,serverName,connectionId,metricType,value,tags");
    assert!(lines[1].contains(",alpha,alpha-1,response_time,12,"));
    assert!(lines[2].contains(",alpha,,request_count,1,"));
    assert!(lines[2].ends_with("\"{\"\"method\"\":\"\"file.read\"\"}\""));

    let json_export = monitoring.export_metrics(ExportFormat::Json, None).await.unwrap();
    let points: Value = serde_json::from_str(&json_export).unwrap();
    assert_eq!(points.as_array().unwrap().len(), 2);

    clock.advance(Duration::from_secs(1));
    let later = monitoring
        .export_metrics(ExportFormat::Json, Some(start + ChronoDuration::milliseconds(500)))
        .await
        .unwrap();
    let points: Value = serde_json::from_str(&later).unwrap();
    assert!(points.as_array().unwrap().is_empty());
}

/// Test: metrics, logs and alerts each expire on their own retention window
#[tokio::test]
async fn test_retention_cleanup() {
    let (monitoring, clock) = service(quiet_config());
    monitoring.handle_event(&completed("alpha", true, 10)).await;
    monitoring
        .create_alert("circuit_open", Severity::High, "alpha", "open", None, None, None)
        .await;

    let report = monitoring.cleanup().await;
    assert_eq!(report.metrics, 0);
    assert_eq!(report.logs, 0);
    assert_eq!(report.alerts, 0);

    // Metrics are kept for 7 days
    clock.advance(Duration::from_secs(8 * 24 * 3600));
    let report = monitoring.cleanup().await;
    assert_eq!(report.metrics, 2);
    assert_eq!(report.logs, 0);
    assert_eq!(report.alerts, 0);

    // Logs for 30
    clock.advance(Duration::from_secs(23 * 24 * 3600));
    let report = monitoring.cleanup().await;
    assert_eq!(report.logs, 1);
    assert_eq!(report.alerts, 0);

    // Alerts for 90
    clock.advance(Duration::from_secs(60 * 24 * 3600));
    let report = monitoring.cleanup().await;
    assert_eq!(report.alerts, 1);
    assert!(monitoring.get_alerts(&AlertFilter::default()).await.is_empty());
}

/// Test: the dashboard summarises servers, traffic and alerts
#[tokio::test]
async fn test_dashboard() {
    let (monitoring, _clock) = service(quiet_config());
    monitoring.handle_event(&completed("alpha", true, 10)).await;
    monitoring.handle_event(&completed("alpha", true, 30)).await;
    monitoring.handle_event(&completed("beta", false, 50)).await;

    let dashboard = monitoring.get_dashboard().await;
    assert_eq!(dashboard.overview.total_servers, 2);
    assert_eq!(dashboard.overview.healthy_servers, 1);
    assert_eq!(dashboard.overview.unhealthy_servers, 1);
    assert_eq!(dashboard.overview.recent_requests, 3);
    assert_eq!(dashboard.overview.recent_errors, 1);
    assert!((dashboard.overview.average_response_time - 30.0).abs() < 1e-9);
    // beta went straight to unhealthy
    assert_eq!(dashboard.overview.active_alerts, 1);
    assert_eq!(dashboard.recent_alerts[0].alert_type, "server_unhealthy");
    assert!(dashboard.system.cpu_count >= 1);
}

/// Test: a running gateway feeds monitoring through the event bus
#[tokio::test]
async fn test_runtime_wires_monitoring() {
    let mut config = Config::default();
    config.monitoring.console = false;
    config.mcp_servers.insert(
        "alpha".to_string(),
        ServerConfig::new("fake").with_capabilities(["file.*"]),
    );
    let clock = ManualClock::starting_now();
    let runtime = GatewayRuntime::build(
        config,
        Arc::new(FakeTransportFactory::new(FakeBackend::echo())),
        clock,
    );
    runtime.start().await.unwrap();

    let response = runtime
        .gateway
        .execute("file.write", json!({}), &McpRequestContext::trusted(), ExecuteOptions::default())
        .await;
    assert!(response.success);

    let monitoring = runtime.monitoring.clone().unwrap();
    let mut health = None;
    for _ in 0..100 {
        health = monitoring.get_server_health("alpha").await;
        if health.as_ref().map_or(false, |h| h.request_count == 1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let health = health.expect("monitoring never saw the request");
    assert_eq!(health.request_count, 1);
    assert_eq!(health.status, HealthStatus::Healthy);

    runtime.shutdown().await.unwrap();
}
