//! Server gateway
//!
//! Single entry point for logical requests: security policy, response cache,
//! capability routing with a configurable load-balancing strategy, and
//! gateway-level retry on top of the connection manager. Every failure is
//! folded into a `Response`; nothing escapes `execute` as an error.

use crate::config::{
    CacheConfig, Config, EvictionPolicy, GatewayConfig, GatewayRetryConfig, LoadBalancingStrategy,
    SecurityConfig,
};
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent};
use crate::pool::{ConnectionManager, PoolStats, RequestOptions};
use crate::registry::{infer_category, method_prefix, HealthStatus, RegisteredServer, ServerRegistry};
use crate::routing::audit::AuditLogger;
use crate::routing::cache::{cache_key, is_cacheable, CacheStats, ResponseCache};
use crate::routing::load_balancer::{Candidate, LoadBalancer};
use crate::routing::queue::{Rejected, RequestQueue};
use crate::routing::retry::{RetryExecutor, RetryPolicy};
use crate::routing::security::SecurityPolicy;
use crate::routing::types::{ExecuteOptions, McpRequestContext, Request, Response, ResponseMetadata};
use crate::utils::{millis_between, SharedClock};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// EMA weight of the newest sample
const RESPONSE_TIME_ALPHA: f64 = 0.1;

/// Gateway statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_requests: u64,
    /// Exponential moving average over backend-served requests (ms)
    pub average_response_time: f64,
    /// How often each server was chosen
    pub server_decisions: HashMap<String, u64>,
    pub method_counts: HashMap<String, u64>,
    pub cache: CacheStats,
    pub queue_length: usize,
    pub uptime_seconds: u64,
    pub connection_pools: HashMap<String, PoolStats>,
}

#[derive(Debug, Default)]
struct StatsState {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    cached_requests: u64,
    average_response_time: f64,
    timed_samples: u64,
    server_decisions: HashMap<String, u64>,
    method_counts: HashMap<String, u64>,
}

impl StatsState {
    fn record(&mut self, method: &str, success: bool, from_cache: bool, response_time_ms: u64) {
        self.total_requests += 1;
        *self.method_counts.entry(method.to_string()).or_default() += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        if from_cache {
            self.cached_requests += 1;
            return;
        }
        let sample = response_time_ms as f64;
        self.average_response_time = if self.timed_samples == 0 {
            sample
        } else {
            RESPONSE_TIME_ALPHA * sample + (1.0 - RESPONSE_TIME_ALPHA) * self.average_response_time
        };
        self.timed_samples += 1;
    }
}

/// Catalog returned by `get_available_services`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableServices {
    pub servers: Vec<RegisteredServer>,
    pub capabilities: Vec<String>,
    pub categories: Vec<String>,
}

/// Partial cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfigUpdate {
    pub enabled: Option<bool>,
    pub ttl: Option<u64>,
    pub max_size: Option<usize>,
    pub eviction_policy: Option<EvictionPolicy>,
}

/// Partial gateway configuration accepted by `update_config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfigUpdate {
    pub strategy: Option<LoadBalancingStrategy>,
    pub weights: Option<HashMap<String, u32>>,
    pub cache: Option<CacheConfigUpdate>,
    pub retry: Option<GatewayRetryConfig>,
    pub request_timeout: Option<u64>,
    pub blocked_methods: Option<Vec<String>>,
    pub allowed_methods: Option<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Where an attempt ended up, for response metadata
#[derive(Debug, Default)]
struct Routed {
    server_name: Option<String>,
    provider: Option<String>,
    retry_count: u32,
    from_cache: bool,
}

pub struct ServerGateway {
    config: RwLock<GatewayConfig>,
    security: RwLock<SecurityPolicy>,
    shutdown_timeout: Duration,
    registry: Arc<dyn ServerRegistry>,
    connections: Arc<ConnectionManager>,
    load_balancer: LoadBalancer,
    cache: Mutex<ResponseCache>,
    stats: Mutex<StatsState>,
    queue: Mutex<RequestQueue>,
    audit: AuditLogger,
    events: EventBus,
    clock: SharedClock,
    started_at: DateTime<Utc>,
    in_flight: AtomicUsize,
    accepting: AtomicBool,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ServerGateway {
    pub fn new(
        config: &Config,
        registry: Arc<dyn ServerRegistry>,
        connections: Arc<ConnectionManager>,
        events: EventBus,
        clock: SharedClock,
    ) -> Self {
        let started_at = clock.utc();
        Self {
            config: RwLock::new(config.gateway.clone()),
            security: RwLock::new(SecurityPolicy::new(config.security.clone())),
            shutdown_timeout: Duration::from_millis(config.connection_pool.shutdown_timeout),
            registry,
            connections,
            load_balancer: LoadBalancer::new(),
            cache: Mutex::new(ResponseCache::new(config.gateway.cache.clone())),
            stats: Mutex::new(StatsState::default()),
            queue: Mutex::new(RequestQueue::new(config.gateway.queue.max_size)),
            audit: AuditLogger::default(),
            events,
            clock,
            started_at,
            in_flight: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<dyn ServerRegistry> {
        &self.registry
    }

    /// Execute a logical request. Never fails; errors come back as `success: false`.
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        context: &McpRequestContext,
        options: ExecuteOptions,
    ) -> Response {
        let _in_flight = InFlight::enter(&self.in_flight);
        let started = Instant::now();
        let config = self.config.read().await.clone();

        let timeout = Duration::from_millis(options.timeout.unwrap_or(config.request_timeout));
        let mut request = Request::new(method, params, timeout, config.retry.max_attempts, self.clock.utc());
        request.priority = options.priority;
        request.cacheable = options.use_cache && config.cache.enabled && is_cacheable(method);
        if let Some(max_attempts) = options.max_attempts {
            request.retries = max_attempts.max(1);
        }

        let mut routed = Routed::default();
        let result = self.execute_inner(&request, context, &config, &mut routed).await;

        let response_time = if routed.from_cache {
            0
        } else {
            started.elapsed().as_millis() as u64
        };
        let metadata = ResponseMetadata {
            server_name: routed.server_name.clone(),
            response_time,
            from_cache: routed.from_cache,
            retry_count: routed.retry_count,
            provider: routed.provider.clone(),
        };
        let response = match result {
            Ok(data) => Response::ok(request.id.clone(), data, metadata),
            Err(ref e) => {
                debug!(method = %method, code = e.code(), error = %e, "Gateway request failed");
                Response::failed(request.id.clone(), e, metadata)
            }
        };

        self.stats
            .lock()
            .await
            .record(method, response.success, routed.from_cache, response_time);
        self.audit.log_request(method, context, &response);
        self.events.emit(GatewayEvent::GatewayRequest {
            request_id: response.id.clone(),
            method: method.to_string(),
            server_name: routed.server_name,
            success: response.success,
            from_cache: routed.from_cache,
            response_time_ms: response_time,
            retry_count: routed.retry_count,
            error_code: response.error_code().map(str::to_string),
        });

        response
    }

    async fn execute_inner(
        &self,
        request: &Request,
        context: &McpRequestContext,
        config: &GatewayConfig,
        routed: &mut Routed,
    ) -> Result<Value> {
        self.security.read().await.check(&request.method, context)?;

        let key = if request.cacheable {
            let key = cache_key(&request.method, &request.params);
            let hit = self.cache.lock().await.get(&key, self.clock.utc());
            if let Some(data) = hit {
                debug!("Cache hit for {}", request.method);
                self.events.emit(GatewayEvent::CacheHit {
                    method: request.method.clone(),
                    key,
                });
                routed.from_cache = true;
                routed.provider = Some("cache".to_string());
                return Ok(data);
            }
            Some(key)
        } else {
            None
        };

        let server_name = self.select_server(&request.method, config).await?;
        routed.server_name = Some(server_name.clone());
        *self
            .stats
            .lock()
            .await
            .server_decisions
            .entry(server_name.clone())
            .or_default() += 1;

        let params = if request.params.is_null() {
            None
        } else {
            Some(request.params.clone())
        };
        let opts = RequestOptions {
            timeout: Some(request.timeout),
            // Gateway backoff is the only retry layer for gateway requests
            retries: Some(0),
            priority: request.priority,
        };
        let executor = RetryExecutor::new(RetryPolicy::from(GatewayRetryConfig {
            max_attempts: request.retries,
            ..config.retry.clone()
        }));

        let (result, retries) = executor
            .execute_with_retry(&request.method, |_| {
                self.connections
                    .execute_request(&server_name, &request.method, params.clone(), opts.clone())
            })
            .await;
        routed.retry_count = retries;
        let outcome = result?;
        routed.provider = Some(outcome.connection_id.clone());

        if let Some(key) = key {
            let evicted = self
                .cache
                .lock()
                .await
                .insert(key, &request.method, outcome.data.clone(), self.clock.utc());
            if let Some(evicted) = evicted {
                self.events.emit(GatewayEvent::CacheEviction {
                    key: evicted,
                    policy: config.cache.eviction_policy,
                });
            }
        }

        Ok(outcome.data)
    }

    /// Choose a backend for `method` with the configured strategy
    pub async fn select_server(&self, method: &str, config: &GatewayConfig) -> Result<String> {
        let segment = method_prefix(method);
        let category = infer_category(method).map(str::to_string);

        let mut servers = self.registry.find_servers_by_capability(method).await;
        if servers.is_empty() {
            if let Some(ref category) = category {
                servers = self.registry.find_servers_by_category(category).await;
            }
        }
        if servers.is_empty() && !segment.is_empty() {
            servers = self.registry.find_servers_by_category(&segment).await;
        }
        if servers.is_empty() {
            return Err(GatewayError::NoCapableServer {
                method: method.to_string(),
            });
        }

        let healthy: Vec<RegisteredServer> = servers
            .iter()
            .filter(|s| s.health == HealthStatus::Healthy)
            .cloned()
            .collect();
        if !healthy.is_empty() {
            servers = healthy;
        }

        let mut candidates = Vec::with_capacity(servers.len());
        for server in servers {
            let category_match = server.category.as_deref().map_or(false, |c| {
                c.eq_ignore_ascii_case(&segment)
                    || category.as_deref().map_or(false, |inferred| c.eq_ignore_ascii_case(inferred))
            });
            candidates.push(Candidate {
                exact_match: server.has_exact_capability(method),
                category_match,
                active_connections: self.connections.active_connection_count(&server.name).await,
                weight: config.load_balancing.weights.get(&server.name).copied().unwrap_or(1),
                server,
            });
        }

        let idx = self
            .load_balancer
            .select(config.load_balancing.strategy, &candidates)
            .ok_or_else(|| GatewayError::NoCapableServer {
                method: method.to_string(),
            })?;
        let chosen = candidates.swap_remove(idx).server.name;
        debug!(
            method = %method,
            server = %chosen,
            strategy = %config.load_balancing.strategy,
            "Selected server"
        );
        Ok(chosen)
    }

    pub async fn get_stats(&self) -> GatewayStats {
        let cache = self.cache.lock().await.stats();
        let queue_length = self.queue.lock().await.len();
        let connection_pools = self.connections.get_pool_stats().await;
        let stats = self.stats.lock().await;
        GatewayStats {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            cached_requests: stats.cached_requests,
            average_response_time: stats.average_response_time,
            server_decisions: stats.server_decisions.clone(),
            method_counts: stats.method_counts.clone(),
            cache,
            queue_length,
            uptime_seconds: millis_between(self.started_at, self.clock.utc()) / 1000,
            connection_pools,
        }
    }

    pub async fn get_available_services(&self) -> AvailableServices {
        AvailableServices {
            servers: self.registry.get_all_servers().await,
            capabilities: self.registry.get_available_capabilities().await,
            categories: self.registry.get_available_categories().await,
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        info!("Response cache cleared");
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Apply a partial configuration update
    pub async fn update_config(&self, update: GatewayConfigUpdate) {
        let mut config = self.config.write().await;

        if let Some(strategy) = update.strategy {
            info!("Load balancing strategy changed: {} -> {}", config.load_balancing.strategy, strategy);
            config.load_balancing.strategy = strategy;
        }
        if let Some(weights) = update.weights {
            config.load_balancing.weights = weights;
        }
        if let Some(retry) = update.retry {
            config.retry = retry;
        }
        if let Some(timeout) = update.request_timeout {
            config.request_timeout = timeout;
        }
        if let Some(cache) = update.cache {
            let merged = CacheConfig {
                enabled: cache.enabled.unwrap_or(config.cache.enabled),
                ttl: cache.ttl.unwrap_or(config.cache.ttl),
                max_size: cache.max_size.unwrap_or(config.cache.max_size),
                eviction_policy: cache.eviction_policy.unwrap_or(config.cache.eviction_policy),
                cleanup_interval: config.cache.cleanup_interval,
            };
            let evicted = self.cache.lock().await.update_config(merged.clone());
            for key in evicted {
                self.events.emit(GatewayEvent::CacheEviction {
                    key,
                    policy: merged.eviction_policy,
                });
            }
            config.cache = merged;
        }
        drop(config);

        if update.blocked_methods.is_some() || update.allowed_methods.is_some() {
            let mut security = self.security.write().await;
            let current = security.config().clone();
            *security = SecurityPolicy::new(SecurityConfig {
                blocked_methods: update.blocked_methods.unwrap_or(current.blocked_methods),
                allowed_methods: update.allowed_methods.or(current.allowed_methods),
                enforce_permissions: current.enforce_permissions,
            });
        }
    }

    /// Queue a request for the background drain loop.
    ///
    /// The receiver resolves with the request's response; a full queue or a
    /// shutting-down gateway answers immediately.
    pub async fn enqueue(
        &self,
        method: &str,
        params: Value,
        context: McpRequestContext,
        options: ExecuteOptions,
        priority: i32,
    ) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        let now = self.clock.utc();
        let pushed = {
            let mut queue = self.queue.lock().await;
            let capacity = queue.max_size();
            queue
                .push(method, params, context, options, priority, now, tx)
                .map_err(|rejected| (rejected, capacity))
        };

        if let Err((rejected, capacity)) = pushed {
            let (error, responder) = match rejected {
                Rejected::Full(responder) => (GatewayError::QueueFull { capacity }, responder),
                Rejected::Closed(responder) => (GatewayError::ShuttingDown, responder),
            };
            warn!("Rejected queued request {}: {}", method, error);
            let _ = responder.send(Response::failed(
                uuid::Uuid::new_v4().to_string(),
                &error,
                ResponseMetadata::default(),
            ));
        }
        rx
    }

    /// Run one batch from the queue through `execute`
    pub async fn process_queue_batch(&self) -> usize {
        let batch_size = self.config.read().await.queue.batch_size.max(1);
        let batch = self.queue.lock().await.drain_batch(batch_size);
        let count = batch.len();
        if count == 0 {
            return 0;
        }

        join_all(batch.into_iter().map(|queued| async move {
            let response = self
                .execute(&queued.method, queued.params, &queued.context, queued.options)
                .await;
            let _ = queued.responder.send(response);
        }))
        .await;
        count
    }

    /// Drop expired cache entries
    pub async fn sweep_cache(&self) -> usize {
        let purged = self.cache.lock().await.purge_expired(self.clock.utc());
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    /// Start the cache sweep and queue drain loops
    pub async fn start(self: &Arc<Self>) {
        let config = self.config.read().await.clone();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        let gateway: Weak<Self> = Arc::downgrade(self);
        let sweep_period = Duration::from_millis(config.cache.cleanup_interval.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(sweep_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = gateway.upgrade() else {
                    break;
                };
                strong.sweep_cache().await;
            }
        }));

        let gateway: Weak<Self> = Arc::downgrade(self);
        let drain_period = Duration::from_millis(config.queue.interval.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(drain_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(strong) = gateway.upgrade() else {
                    break;
                };
                strong.process_queue_batch().await;
            }
        }));
    }

    /// Stop accepting queued work, wait for in-flight requests, then stop
    /// the loops and the connection manager.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down gateway");
        self.events.emit(GatewayEvent::ShutdownStarted);

        let leftover = {
            let mut queue = self.queue.lock().await;
            queue.close();
            let remaining = queue.len();
            queue.drain_batch(remaining)
        };
        for queued in leftover {
            let _ = queued.responder.send(Response::failed(
                uuid::Uuid::new_v4().to_string(),
                &GatewayError::ShuttingDown,
                ResponseMetadata::default(),
            ));
        }

        // No deadline when the timeout runs past the clock's range
        let deadline = Instant::now().checked_add(self.shutdown_timeout);
        while self.in_flight.load(Ordering::SeqCst) > 0 && deadline.map_or(true, |d| Instant::now() < d) {
            sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.in_flight.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!("Shutting down with {} requests still in flight", remaining);
        }

        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
        self.connections.shutdown().await
    }
}

impl Drop for ServerGateway {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}
