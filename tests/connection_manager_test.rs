//! Connection Manager Tests
//!
//! Drives the pool against the in-memory fake backend and a manual clock.
//!
//! Tests cover:
//! - Circuit breaker open / fast-fail / half-open recovery
//! - Pool bounds under concurrent load
//! - Crash detection and restart through the health pass
//! - Idle trimming and shutdown

use mcp_gateway::config::{CircuitBreakerConfig, ConnectionPoolConfig, RateLimitConfig, ServerConfig, ServerPolicy};
use mcp_gateway::events::{EventBus, GatewayEvent};
use mcp_gateway::pool::{CircuitState, ConnectionManager, ConnectionState, RequestOptions};
use mcp_gateway::testing::{FakeBackend, FakeReply, FakeTransportFactory, ManualClock, RecordingObserver};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    manager: Arc<ConnectionManager>,
    backend: FakeBackend,
    clock: Arc<ManualClock>,
    recorder: Arc<RecordingObserver>,
}

fn harness(backend: FakeBackend, policy: ServerPolicy, pool: ConnectionPoolConfig) -> Harness {
    let clock = ManualClock::starting_now();
    let events = EventBus::new();
    let recorder = RecordingObserver::new();
    events.subscribe(recorder.clone());

    let mut servers = BTreeMap::new();
    servers.insert(
        "alpha".to_string(),
        ServerConfig::new("fake-server")
            .with_capabilities(["alpha.*"])
            .with_policy(policy),
    );

    let manager = Arc::new(ConnectionManager::new(
        servers,
        pool,
        Arc::new(FakeTransportFactory::new(backend.clone())),
        clock.clone(),
        events,
    ));
    Harness {
        manager,
        backend,
        clock,
        recorder,
    }
}

fn no_retry_policy() -> ServerPolicy {
    ServerPolicy {
        retry_attempts: 0,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: 1_000,
        },
        ..Default::default()
    }
}

fn single_connection_pool() -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        min_connections: 1,
        max_connections: 1,
        ..Default::default()
    }
}

/// Test: three failures open the breaker, the fourth call never reaches the
/// process, and a successful half-open trial closes it again
#[tokio::test]
async fn test_circuit_breaker_open_and_recover() {
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Error {
            code: -32000,
            message: "boom".into(),
        }),
        no_retry_policy(),
        single_connection_pool(),
    );
    h.manager.initialize().await.unwrap();

    for _ in 0..3 {
        let err = h
            .manager
            .execute_request("alpha", "alpha.run", None, RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }
    assert_eq!(h.manager.circuit_state("alpha").await, CircuitState::Open);
    assert_eq!(h.backend.request_count("alpha.run", None), 3);

    // Within resetTimeout: fail fast without contacting the process
    h.clock.advance(Duration::from_millis(999));
    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CIRCUIT_OPEN");
    assert_eq!(h.backend.request_count("alpha.run", None), 3);

    // After resetTimeout the next request is the half-open trial
    h.clock.advance(Duration::from_millis(1));
    h.backend.set_handler(|_, _| FakeReply::Ok(json!({"ok": true})));
    let outcome = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.data, json!({"ok": true}));
    assert_eq!(h.manager.circuit_state("alpha").await, CircuitState::Closed);
    assert_eq!(h.backend.request_count("alpha.run", None), 4);

    let transitions: Vec<(CircuitState, CircuitState)> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GatewayEvent::CircuitStateChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );

    h.manager.shutdown().await.unwrap();
}

/// Test: a failed half-open trial reopens the breaker for another cooldown
#[tokio::test]
async fn test_half_open_failure_reopens() {
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Error {
            code: -1,
            message: "down".into(),
        }),
        no_retry_policy(),
        single_connection_pool(),
    );
    h.manager.initialize().await.unwrap();
    for _ in 0..3 {
        let _ = h
            .manager
            .execute_request("alpha", "alpha.run", None, RequestOptions::default())
            .await;
    }

    h.clock.advance(Duration::from_millis(1_000));
    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKEND_ERROR");
    assert_eq!(h.manager.circuit_state("alpha").await, CircuitState::Open);

    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CIRCUIT_OPEN");
    assert_eq!(h.backend.request_count("alpha.run", None), 4);
}

/// Test: connection-level retries make `retries + 1` attempts
#[tokio::test]
async fn test_connection_level_retries() {
    let policy = ServerPolicy {
        retry_attempts: 2,
        retry_delay: 1,
        ..Default::default()
    };
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Error {
            code: -1,
            message: "flaky".into(),
        }),
        policy,
        single_connection_pool(),
    );
    h.manager.initialize().await.unwrap();

    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BACKEND_ERROR");
    assert_eq!(h.backend.request_count("alpha.run", None), 3);

    // Explicit retries override the server policy
    let _ = h
        .manager
        .execute_request(
            "alpha",
            "alpha.run",
            None,
            RequestOptions {
                retries: Some(0),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(h.backend.request_count("alpha.run", None), 4);
}

/// Test: concurrent load grows the pool up to maxConnections and no further
#[tokio::test]
async fn test_pool_stays_within_bounds() {
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Delayed(Duration::from_millis(50), json!("done"))),
        ServerPolicy::default(),
        ConnectionPoolConfig {
            min_connections: 1,
            max_connections: 2,
            poll_interval: 5,
            ..Default::default()
        },
    );
    h.manager.initialize().await.unwrap();
    assert_eq!(h.backend.spawn_count(), 1);

    let calls = (0..5).map(|_| {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            manager
                .execute_request("alpha", "alpha.work", None, RequestOptions::default())
                .await
        })
    });
    for call in futures_util::future::join_all(calls).await {
        assert!(call.unwrap().is_ok());
    }

    assert_eq!(h.backend.spawn_count(), 2);
    let stats = h.manager.get_pool_stats().await;
    let alpha = &stats["alpha"];
    assert_eq!(alpha.total, 2);
    assert_eq!(alpha.idle, 2);
    assert_eq!(alpha.total_requests, 5);
    assert_eq!(alpha.successful_requests, 5);
}

/// Test: waiting for a busy pool times out with CONNECTION_TIMEOUT
#[tokio::test]
async fn test_wait_for_connection_times_out() {
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Delayed(Duration::from_millis(300), json!("slow"))),
        ServerPolicy::default(),
        ConnectionPoolConfig {
            min_connections: 1,
            max_connections: 1,
            poll_interval: 5,
            ..Default::default()
        },
    );
    h.manager.initialize().await.unwrap();

    let busy = {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            manager
                .execute_request("alpha", "alpha.slow", None, RequestOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = h
        .manager
        .get_connection(
            "alpha",
            &RequestOptions {
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONNECTION_TIMEOUT");
    assert!(busy.await.unwrap().is_ok());
}

/// Test: a per-connection rate limit makes callers wait for the window
#[tokio::test]
async fn test_rate_limited_connection_is_skipped() {
    let policy = ServerPolicy {
        rate_limit: RateLimitConfig {
            requests: 1,
            window: 60_000,
        },
        ..Default::default()
    };
    let h = harness(
        FakeBackend::echo(),
        policy,
        ConnectionPoolConfig {
            min_connections: 1,
            max_connections: 1,
            poll_interval: 5,
            ..Default::default()
        },
    );
    h.manager.initialize().await.unwrap();

    h.manager
        .execute_request("alpha", "alpha.one", None, RequestOptions::default())
        .await
        .unwrap();
    let err = h
        .manager
        .execute_request(
            "alpha",
            "alpha.two",
            None,
            RequestOptions {
                timeout: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONNECTION_TIMEOUT");

    h.clock.advance(Duration::from_millis(60_001));
    assert!(h
        .manager
        .execute_request("alpha", "alpha.two", None, RequestOptions::default())
        .await
        .is_ok());
}

/// Test: a crashed process is marked disconnected and restarted by the health pass
#[tokio::test]
async fn test_crash_is_restarted_by_health_check() {
    let h = harness(
        FakeBackend::new(|_, request| {
            if request.method == "alpha.crash" {
                FakeReply::Crash
            } else {
                FakeReply::Ok(json!("pong"))
            }
        }),
        ServerPolicy::default(),
        single_connection_pool(),
    );
    h.manager.initialize().await.unwrap();

    let err = h
        .manager
        .execute_request("alpha", "alpha.crash", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROCESS_DISCONNECTED");
    // Crashes are not retried on the same connection
    assert_eq!(h.backend.request_count("alpha.crash", None), 1);

    let stats = h.manager.get_pool_stats().await;
    assert_eq!(stats["alpha"].disconnected, 1);

    h.manager.health_check_server("alpha").await;

    let restarted = h.recorder.count(|e| {
        matches!(e, GatewayEvent::ProcessRestarted { success: true, .. })
    });
    assert_eq!(restarted, 1);
    assert_eq!(h.backend.spawn_count(), 2);

    let stats = h.manager.get_pool_stats().await;
    assert_eq!(stats["alpha"].idle, 1);
    assert_eq!(stats["alpha"].connections[0].restarts, 1);
    assert!(h
        .manager
        .execute_request("alpha", "alpha.ok", None, RequestOptions::default())
        .await
        .is_ok());
}

/// Test: health probes ping idle connections and report the result
#[tokio::test]
async fn test_health_probe_reports_completion() {
    let h = harness(FakeBackend::echo(), ServerPolicy::default(), single_connection_pool());
    h.manager.initialize().await.unwrap();

    h.manager.health_check_all().await;
    assert_eq!(h.backend.request_count("ping", Some("alpha")), 1);
    assert_eq!(
        h.recorder.count(|e| matches!(e, GatewayEvent::HealthCheckCompleted { healthy: true, .. })),
        1
    );

    let states: Vec<ConnectionState> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            GatewayEvent::ConnectionStateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![ConnectionState::Active, ConnectionState::Idle]);
}

/// Test: idle connections above the minimum are closed after idleTimeout
#[tokio::test]
async fn test_idle_connections_are_trimmed() {
    let h = harness(
        FakeBackend::new(|_, _| FakeReply::Delayed(Duration::from_millis(30), json!("ok"))),
        ServerPolicy::default(),
        ConnectionPoolConfig {
            min_connections: 1,
            max_connections: 3,
            idle_timeout: 1_000,
            poll_interval: 5,
            ..Default::default()
        },
    );
    h.manager.initialize().await.unwrap();

    let calls = (0..3).map(|_| {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            manager
                .execute_request("alpha", "alpha.work", None, RequestOptions::default())
                .await
        })
    });
    futures_util::future::join_all(calls).await;
    assert_eq!(h.manager.get_pool_stats().await["alpha"].total, 3);

    assert_eq!(h.manager.close_idle_connections().await, 0);
    h.clock.advance(Duration::from_millis(1_000));
    assert_eq!(h.manager.close_idle_connections().await, 2);
    assert_eq!(h.manager.get_pool_stats().await["alpha"].total, 1);
}

/// Test: spawn failures surface as PROCESS_SPAWN_FAILURE and a ConnectionFailed event
#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let h = harness(FakeBackend::echo(), ServerPolicy::default(), single_connection_pool());
    h.backend.fail_spawns(true);
    h.manager.initialize().await.unwrap();
    assert_eq!(
        h.recorder.count(|e| matches!(e, GatewayEvent::ConnectionFailed { .. })),
        1
    );

    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PROCESS_SPAWN_FAILURE");

    h.backend.fail_spawns(false);
    assert!(h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .is_ok());
}

/// Test: shutdown stops every process and rejects new work
#[tokio::test]
async fn test_shutdown_rejects_new_requests() {
    let h = harness(FakeBackend::echo(), ServerPolicy::default(), single_connection_pool());
    h.manager.initialize().await.unwrap();
    h.manager.shutdown().await.unwrap();

    let err = h
        .manager
        .execute_request("alpha", "alpha.run", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SHUTTING_DOWN");
    assert_eq!(h.manager.get_pool_stats().await["alpha"].total, 0);
}
