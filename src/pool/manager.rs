//! Connection manager
//!
//! Owns one pool of connections per configured backend server and executes
//! requests against them with per-connection circuit breaking, rate limiting
//! and retry. A background task per server restarts dead processes, probes
//! idle connections and trims idle connections above the pool minimum.

use crate::config::{Config, ConnectionPoolConfig, ServerConfig};
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent};
use crate::mcp::{McpRequest, McpTransport, ProcessTransportFactory, TransportFactory};
use crate::pool::circuit_breaker::{CircuitState, CircuitTransition};
use crate::pool::connection::{Connection, ConnectionInfo, ConnectionState};
use crate::pool::health_checker::ConnectionHealthChecker;
use crate::utils::{system_clock, SharedClock};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-call options for the connection manager
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Per-attempt timeout; also bounds the wait for a free connection
    pub timeout: Option<Duration>,
    /// Additional attempts after the first; defaults to the server's `retryAttempts`
    pub retries: Option<u32>,
    /// Minimum connection priority to prefer
    pub priority: Option<i32>,
}

/// Result of a successful `execute_request`
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub data: Value,
    pub connection_id: String,
    pub attempts: u32,
    pub response_time_ms: u64,
}

/// A connection checked out of its pool
#[derive(Clone)]
pub struct ConnectionLease {
    pub server_name: String,
    pub connection_id: String,
    pub transport: Arc<dyn McpTransport>,
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("server_name", &self.server_name)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// Pool summary for one server
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub server_name: String,
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub error: usize,
    pub disconnected: usize,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: f64,
    pub connections: Vec<ConnectionInfo>,
}

struct ServerPool {
    config: ServerConfig,
    connections: Vec<Connection>,
}

impl ServerPool {
    fn find_mut(&mut self, connection_id: &str) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id == connection_id)
    }
}

fn is_dead(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Disconnected | ConnectionState::Error)
}

/// Connection manager for all configured backend servers
pub struct ConnectionManager {
    pool_config: ConnectionPoolConfig,
    pools: BTreeMap<String, Arc<Mutex<ServerPool>>>,
    factory: Arc<dyn TransportFactory>,
    clock: SharedClock,
    events: EventBus,
    health_checker: ConnectionHealthChecker,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        servers: BTreeMap<String, ServerConfig>,
        pool_config: ConnectionPoolConfig,
        factory: Arc<dyn TransportFactory>,
        clock: SharedClock,
        events: EventBus,
    ) -> Self {
        let pools = servers
            .into_iter()
            .map(|(name, config)| {
                let pool = ServerPool {
                    config,
                    connections: Vec::new(),
                };
                (name, Arc::new(Mutex::new(pool)))
            })
            .collect();

        Self {
            pool_config,
            pools,
            factory,
            clock,
            events,
            health_checker: ConnectionHealthChecker::default(),
            tasks: std::sync::Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Manager spawning real processes on the wall clock
    pub fn from_config(config: &Config, events: EventBus) -> Self {
        Self::new(
            config.mcp_servers.clone(),
            config.connection_pool.clone(),
            Arc::new(ProcessTransportFactory),
            system_clock(),
            events,
        )
    }

    pub fn with_health_checker(mut self, health_checker: ConnectionHealthChecker) -> Self {
        self.health_checker = health_checker;
        self
    }

    pub fn server_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn pool_config(&self) -> &ConnectionPoolConfig {
        &self.pool_config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn pool(&self, server_name: &str) -> Result<&Arc<Mutex<ServerPool>>> {
        self.pools
            .get(server_name)
            .ok_or_else(|| GatewayError::internal(format!("Unknown MCP server '{}'", server_name)))
    }

    /// Spawn the initial connections for every server and start the health loops.
    ///
    /// A server that fails to spawn is reported and skipped; the others still start.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        info!("Initializing connection pools for {} servers", self.pools.len());

        for (name, pool) in &self.pools {
            let config = pool.lock().await.config.clone();
            let per_server = if config.config.critical { 2 } else { 1 };
            let target = self.pool_config.min_connections.min(per_server);

            for _ in 0..target {
                match self.spawn_connection(name, &config).await {
                    Ok(connection) => pool.lock().await.connections.push(connection),
                    Err(e) => {
                        error!("Failed to start MCP server '{}': {}", name, e);
                        self.events.emit(GatewayEvent::ConnectionFailed {
                            server_name: name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        self.start_health_checks();
        Ok(())
    }

    async fn spawn_connection(&self, server_name: &str, config: &ServerConfig) -> Result<Connection> {
        let transport = self.factory.spawn(server_name, config).await?;
        let id = format!("{}-{}", server_name, &Uuid::new_v4().simple().to_string()[..8]);
        let connection = Connection::new(id, server_name, transport, &config.config, self.clock.utc());

        debug!("Created connection {} for server '{}'", connection.id, server_name);
        self.events.emit(GatewayEvent::ConnectionCreated {
            server_name: server_name.to_string(),
            connection_id: connection.id.clone(),
        });
        Ok(connection)
    }

    fn set_state(&self, connection: &mut Connection, to: ConnectionState) {
        let from = connection.state;
        if from == to {
            return;
        }
        connection.state = to;
        self.events.emit(GatewayEvent::ConnectionStateChanged {
            server_name: connection.server_name.clone(),
            connection_id: connection.id.clone(),
            from,
            to,
        });
    }

    fn emit_circuit(&self, connection: &Connection, transition: Option<CircuitTransition>) {
        if let Some(CircuitTransition { from, to }) = transition {
            info!(
                server = %connection.server_name,
                connection = %connection.id,
                "Circuit breaker {} -> {}",
                from,
                to
            );
            self.events.emit(GatewayEvent::CircuitStateChanged {
                server_name: connection.server_name.clone(),
                connection_id: connection.id.clone(),
                from,
                to,
            });
        }
    }

    /// Check out the best available connection for `server_name`.
    ///
    /// Available means idle, process alive, breaker not open and under the
    /// rate limit. Prefers higher priority, then least recently used. Grows the
    /// pool up to `maxConnections`, otherwise polls until the timeout.
    pub async fn get_connection(&self, server_name: &str, opts: &RequestOptions) -> Result<ConnectionLease> {
        let pool = self.pool(server_name)?;
        let wait = opts.timeout.unwrap_or_else(|| self.pool_config.connection_timeout());
        let started = Instant::now();

        loop {
            if self.is_shutting_down() {
                return Err(GatewayError::ShuttingDown);
            }

            {
                let mut guard = pool.lock().await;
                let now = self.clock.utc();

                for connection in guard.connections.iter_mut() {
                    let transition = connection.circuit_breaker.poll(now);
                    self.emit_circuit(connection, transition);
                    if connection.state == ConnectionState::Idle && !connection.transport.is_alive().await {
                        warn!("Connection {} lost its process", connection.id);
                        self.set_state(connection, ConnectionState::Disconnected);
                    }
                }

                let mut candidates: Vec<usize> = Vec::new();
                for (idx, connection) in guard.connections.iter_mut().enumerate() {
                    if connection.state == ConnectionState::Idle
                        && !connection.circuit_breaker.is_open(now)
                        && connection.rate_limiter.is_allowed(now)
                    {
                        candidates.push(idx);
                    }
                }
                if let Some(min_priority) = opts.priority {
                    if candidates
                        .iter()
                        .any(|&idx| guard.connections[idx].priority >= min_priority)
                    {
                        candidates.retain(|&idx| guard.connections[idx].priority >= min_priority);
                    }
                }
                let selected = candidates.into_iter().min_by(|&a, &b| {
                    let (a, b) = (&guard.connections[a], &guard.connections[b]);
                    b.priority.cmp(&a.priority).then(a.last_used.cmp(&b.last_used))
                });

                if let Some(idx) = selected {
                    let connection = &mut guard.connections[idx];
                    connection.rate_limiter.record(now);
                    connection.last_used = now;
                    self.set_state(connection, ConnectionState::Active);
                    return Ok(ConnectionLease {
                        server_name: server_name.to_string(),
                        connection_id: connection.id.clone(),
                        transport: Arc::clone(&connection.transport),
                    });
                }

                let open: Vec<&Connection> = guard
                    .connections
                    .iter()
                    .filter(|c| c.state == ConnectionState::Idle && c.circuit_breaker.is_open(now))
                    .collect();
                let can_free_up = guard.connections.iter().any(|c| {
                    c.state == ConnectionState::Active
                        || (c.state == ConnectionState::Idle && !c.circuit_breaker.is_open(now))
                });
                if !open.is_empty() && !can_free_up {
                    let retry_after = open
                        .iter()
                        .map(|c| c.circuit_breaker.retry_after(now))
                        .min()
                        .unwrap_or_default();
                    return Err(GatewayError::CircuitOpen {
                        server: server_name.to_string(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    });
                }

                let live = guard.connections.iter().filter(|c| !is_dead(c.state)).count();
                if live < self.pool_config.max_connections {
                    if guard.connections.len() >= self.pool_config.max_connections {
                        if let Some(pos) = guard.connections.iter().position(|c| is_dead(c.state)) {
                            let dead = guard.connections.remove(pos);
                            debug!("Replacing dead connection {}", dead.id);
                            tokio::spawn(async move {
                                let _ = dead.transport.shutdown().await;
                            });
                        }
                    }

                    let config = guard.config.clone();
                    match self.spawn_connection(server_name, &config).await {
                        Ok(mut connection) => {
                            connection.rate_limiter.record(now);
                            connection.last_used = now;
                            self.set_state(&mut connection, ConnectionState::Active);
                            let lease = ConnectionLease {
                                server_name: server_name.to_string(),
                                connection_id: connection.id.clone(),
                                transport: Arc::clone(&connection.transport),
                            };
                            guard.connections.push(connection);
                            return Ok(lease);
                        }
                        Err(e) => {
                            self.events.emit(GatewayEvent::ConnectionFailed {
                                server_name: server_name.to_string(),
                                error: e.to_string(),
                            });
                            return Err(e);
                        }
                    }
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Err(GatewayError::ConnectionTimeout {
                    server: server_name.to_string(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            sleep(self.pool_config.poll_interval().min(wait - elapsed)).await;
        }
    }

    /// Execute one request on a pooled connection with connection-level retry.
    ///
    /// The connection is returned to the pool whatever the outcome.
    pub async fn execute_request(
        &self,
        server_name: &str,
        method: &str,
        params: Option<Value>,
        opts: RequestOptions,
    ) -> Result<RequestOutcome> {
        let lease = self.get_connection(server_name, &opts).await?;
        let started = Instant::now();

        let (result, attempts) = self.execute_with_retry(&lease, method, params, &opts).await;
        let response_time_ms = started.elapsed().as_millis() as u64;
        self.release(&lease, result.as_ref().err(), response_time_ms).await;

        self.events.emit(GatewayEvent::RequestCompleted {
            server_name: server_name.to_string(),
            connection_id: lease.connection_id.clone(),
            method: method.to_string(),
            response_time_ms,
            success: result.is_ok(),
            attempts,
            error_code: result.as_ref().err().map(|e| e.code().to_string()),
        });

        result.map(|data| RequestOutcome {
            data,
            connection_id: lease.connection_id,
            attempts,
            response_time_ms,
        })
    }

    /// Attempt the request up to `retries + 1` times on the leased connection.
    ///
    /// Returns the final result and the number of attempts actually sent.
    pub async fn execute_with_retry(
        &self,
        lease: &ConnectionLease,
        method: &str,
        params: Option<Value>,
        opts: &RequestOptions,
    ) -> (Result<Value>, u32) {
        let policy = match self.pool(&lease.server_name) {
            Ok(pool) => pool.lock().await.config.config.clone(),
            Err(e) => return (Err(e), 0),
        };
        let retries = opts.retries.unwrap_or(policy.retry_attempts);
        let per_attempt = opts.timeout.unwrap_or_else(|| policy.timeout());

        let mut attempts = 0;
        for attempt in 0..=retries {
            if attempt > 0 {
                // State may have moved while we slept
                if let Some(rejection) = self.breaker_rejection(lease).await {
                    return (Err(rejection), attempts);
                }
            }

            attempts += 1;
            let request = McpRequest::new(method, params.clone());
            let result = lease.transport.send_request(request, per_attempt).await;
            self.record_attempt(lease, result.is_ok()).await;

            match result {
                Ok(data) => {
                    if attempt > 0 {
                        info!(
                            server = %lease.server_name,
                            method = %method,
                            attempt = attempts,
                            "Request succeeded after retry"
                        );
                    }
                    return (Ok(data), attempts);
                }
                Err(e) => {
                    let last = attempt == retries
                        || !e.is_retryable()
                        || matches!(e, GatewayError::ProcessCrashed { .. });
                    if last {
                        warn!(
                            server = %lease.server_name,
                            method = %method,
                            attempts = attempts,
                            error = %e,
                            "Request failed"
                        );
                        return (Err(e), attempts);
                    }

                    let delay = policy.retry_delay().saturating_mul(2u32.saturating_pow(attempt));
                    debug!(
                        server = %lease.server_name,
                        method = %method,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }

        (Err(GatewayError::internal("retry loop exhausted")), attempts)
    }

    async fn breaker_rejection(&self, lease: &ConnectionLease) -> Option<GatewayError> {
        let pool = self.pool(&lease.server_name).ok()?;
        let mut guard = pool.lock().await;
        let now = self.clock.utc();
        let connection = guard.find_mut(&lease.connection_id)?;
        let transition = connection.circuit_breaker.poll(now);
        self.emit_circuit(connection, transition);
        if connection.circuit_breaker.is_open(now) {
            Some(GatewayError::CircuitOpen {
                server: lease.server_name.clone(),
                retry_after_ms: connection.circuit_breaker.retry_after(now).as_millis() as u64,
            })
        } else {
            None
        }
    }

    async fn record_attempt(&self, lease: &ConnectionLease, success: bool) {
        let Ok(pool) = self.pool(&lease.server_name) else {
            return;
        };
        let mut guard = pool.lock().await;
        let now = self.clock.utc();
        if let Some(connection) = guard.find_mut(&lease.connection_id) {
            let transition = if success {
                connection.circuit_breaker.record_success(now)
            } else {
                connection.circuit_breaker.record_failure(now)
            };
            self.emit_circuit(connection, transition);
        }
    }

    async fn release(&self, lease: &ConnectionLease, error: Option<&GatewayError>, response_time_ms: u64) {
        let Ok(pool) = self.pool(&lease.server_name) else {
            return;
        };
        let mut guard = pool.lock().await;
        let now = self.clock.utc();
        if let Some(connection) = guard.find_mut(&lease.connection_id) {
            connection.metrics.record(error.is_none(), response_time_ms);
            connection.last_used = now;
            let next = match error {
                Some(GatewayError::ProcessCrashed { .. }) => ConnectionState::Disconnected,
                _ => ConnectionState::Idle,
            };
            self.set_state(connection, next);
        }
    }

    /// One health pass over a server's pool
    pub async fn health_check_server(&self, server_name: &str) {
        let Ok(pool) = self.pool(server_name) else {
            return;
        };

        let (dead, probes) = {
            let mut guard = pool.lock().await;
            let now = self.clock.utc();
            let mut dead = Vec::new();
            let mut probes = Vec::new();
            for connection in guard.connections.iter_mut() {
                let transition = connection.circuit_breaker.poll(now);
                self.emit_circuit(connection, transition);
                if connection.state == ConnectionState::Active {
                    continue;
                }
                if is_dead(connection.state) || !connection.transport.is_alive().await {
                    dead.push(connection.id.clone());
                } else if !connection.circuit_breaker.is_open(now) {
                    // Keep requests off the connection while it is probed
                    self.set_state(connection, ConnectionState::Active);
                    probes.push((connection.id.clone(), Arc::clone(&connection.transport)));
                }
            }
            (dead, probes)
        };

        for connection_id in dead {
            self.restart_connection(server_name, &connection_id).await;
        }

        for (connection_id, transport) in probes {
            let result = self
                .health_checker
                .probe(&connection_id, transport.as_ref(), self.clock.utc())
                .await;

            let mut guard = pool.lock().await;
            let now = self.clock.utc();
            if let Some(connection) = guard.find_mut(&connection_id) {
                let transition = if result.healthy {
                    connection.circuit_breaker.record_success(now)
                } else {
                    connection.circuit_breaker.record_failure(now)
                };
                self.emit_circuit(connection, transition);
                let next = if result.disconnected {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Idle
                };
                self.set_state(connection, next);
            }
            drop(guard);

            self.events.emit(GatewayEvent::HealthCheckCompleted {
                server_name: server_name.to_string(),
                connection_id,
                healthy: result.healthy,
                response_time_ms: result.response_time_ms,
            });
        }

        self.close_idle_for(server_name).await;
    }

    /// Health pass over every pool
    pub async fn health_check_all(&self) {
        for name in self.pools.keys() {
            self.health_check_server(name).await;
        }
    }

    /// Kill and respawn the process behind a connection
    async fn restart_connection(&self, server_name: &str, connection_id: &str) {
        let Ok(pool) = self.pool(server_name) else {
            return;
        };

        let (old_transport, config) = {
            let mut guard = pool.lock().await;
            let config = guard.config.clone();
            match guard.find_mut(connection_id) {
                Some(connection) => {
                    self.set_state(connection, ConnectionState::Disconnected);
                    (Arc::clone(&connection.transport), config)
                }
                None => return,
            }
        };

        info!("🔄 [HEALTH] Restarting process for connection {}", connection_id);
        if let Err(e) = old_transport.shutdown().await {
            warn!("Failed to stop connection {}: {}", connection_id, e);
        }
        let spawned = self.factory.spawn(server_name, &config).await;

        let mut guard = pool.lock().await;
        let success = spawned.is_ok();
        match (guard.find_mut(connection_id), spawned) {
            (Some(connection), Ok(transport)) => {
                connection.transport = transport;
                connection.restarts += 1;
                connection.last_used = self.clock.utc();
                self.set_state(connection, ConnectionState::Idle);
            }
            (Some(connection), Err(e)) => {
                error!("Failed to restart connection {}: {}", connection_id, e);
                self.set_state(connection, ConnectionState::Error);
            }
            (None, Ok(transport)) => {
                // Replaced while we were restarting it
                drop(guard);
                let _ = transport.shutdown().await;
                return;
            }
            (None, Err(_)) => return,
        }
        drop(guard);

        self.events.emit(GatewayEvent::ProcessRestarted {
            server_name: server_name.to_string(),
            connection_id: connection_id.to_string(),
            success,
        });
    }

    async fn close_idle_for(&self, server_name: &str) -> usize {
        let Ok(pool) = self.pool(server_name) else {
            return 0;
        };
        let idle_timeout = self.pool_config.idle_timeout;
        let min = self.pool_config.min_connections;

        let closed: Vec<Connection> = {
            let mut guard = pool.lock().await;
            let now = self.clock.utc();
            let mut closed = Vec::new();
            while guard.connections.len() > min {
                let oldest = guard
                    .connections
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.state == ConnectionState::Idle && c.idle_for_ms(now) >= idle_timeout)
                    .min_by_key(|(_, c)| c.last_used)
                    .map(|(idx, _)| idx);
                match oldest {
                    Some(idx) => closed.push(guard.connections.remove(idx)),
                    None => break,
                }
            }
            closed
        };

        for connection in &closed {
            debug!("Closing idle connection {}", connection.id);
            let _ = connection.transport.shutdown().await;
        }
        closed.len()
    }

    /// Close idle connections above the pool minimum that exceeded `idleTimeout`
    pub async fn close_idle_connections(&self) -> usize {
        let mut closed = 0;
        for name in self.pools.keys() {
            closed += self.close_idle_for(name).await;
        }
        closed
    }

    /// Number of connections currently executing a request
    pub async fn active_connection_count(&self, server_name: &str) -> usize {
        match self.pools.get(server_name) {
            Some(pool) => pool
                .lock()
                .await
                .connections
                .iter()
                .filter(|c| c.state == ConnectionState::Active)
                .count(),
            None => 0,
        }
    }

    /// Worst breaker state among a server's connections
    pub async fn circuit_state(&self, server_name: &str) -> CircuitState {
        let Some(pool) = self.pools.get(server_name) else {
            return CircuitState::Closed;
        };
        let guard = pool.lock().await;
        let states: Vec<CircuitState> = guard.connections.iter().map(|c| c.circuit_breaker.state()).collect();
        if states.contains(&CircuitState::Open) {
            CircuitState::Open
        } else if states.contains(&CircuitState::HalfOpen) {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }

    pub async fn get_pool_stats(&self) -> HashMap<String, PoolStats> {
        let mut stats = HashMap::new();
        for (name, pool) in &self.pools {
            let guard = pool.lock().await;
            let now = self.clock.utc();
            let mut summary = PoolStats {
                server_name: name.clone(),
                total: guard.connections.len(),
                ..Default::default()
            };
            let mut weighted_time = 0.0;
            for connection in &guard.connections {
                match connection.state {
                    ConnectionState::Idle => summary.idle += 1,
                    ConnectionState::Active => summary.active += 1,
                    ConnectionState::Error => summary.error += 1,
                    ConnectionState::Disconnected => summary.disconnected += 1,
                }
                match connection.circuit_breaker.state() {
                    CircuitState::Open => summary.open_circuits += 1,
                    CircuitState::HalfOpen => summary.half_open_circuits += 1,
                    CircuitState::Closed => {}
                }
                summary.total_requests += connection.metrics.total_requests;
                summary.successful_requests += connection.metrics.successful_requests;
                summary.failed_requests += connection.metrics.failed_requests;
                weighted_time += connection.metrics.average_response_time * connection.metrics.total_requests as f64;
                summary.connections.push(connection.info(now));
            }
            if summary.total_requests > 0 {
                summary.average_response_time = weighted_time / summary.total_requests as f64;
            }
            stats.insert(name.clone(), summary);
        }
        stats
    }

    /// Start one health loop per server
    pub fn start_health_checks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (name, pool) in &self.pools {
            let period = pool
                .try_lock()
                .map(|guard| guard.config.config.health_check_interval)
                .unwrap_or(self.pool_config.health_check_interval)
                .max(1);
            let manager: Weak<Self> = Arc::downgrade(self);
            let server_name = name.clone();

            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(Duration::from_millis(period));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(strong) = manager.upgrade() else {
                        break;
                    };
                    if strong.is_shutting_down() {
                        break;
                    }
                    strong.health_check_server(&server_name).await;
                }
            }));
        }
        debug!("Started {} health check loops", tasks.len());
    }

    /// Stop the health loops and terminate every backend process
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down connection manager");

        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }

        let mut transports = Vec::new();
        for pool in self.pools.values() {
            let mut guard = pool.lock().await;
            for mut connection in guard.connections.drain(..) {
                self.set_state(&mut connection, ConnectionState::Disconnected);
                transports.push(connection.transport);
            }
        }

        let count = transports.len();
        let stops = join_all(transports.iter().map(|t| t.shutdown()));
        match timeout(Duration::from_millis(self.pool_config.shutdown_timeout), stops).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(|r| r.err()) {
                    warn!("Error stopping MCP server: {}", e);
                }
                info!("Stopped {} MCP server processes", count);
            }
            Err(_) => warn!("Timed out stopping {} MCP server processes", count),
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}
