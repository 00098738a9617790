//! In-memory test doubles
//!
//! `FakeBackend` scripts how every fake server answers, `FakeTransportFactory`
//! hands out transports bound to it, and `RecordingObserver` captures the
//! exact event sequence the core emits.

use crate::config::ServerConfig;
use crate::error::{GatewayError, Result};
use crate::events::{EventObserver, GatewayEvent};
use crate::mcp::{McpRequest, McpTransport, TransportFactory};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub use crate::utils::ManualClock;

/// Scripted answer of a fake server
#[derive(Debug, Clone)]
pub enum FakeReply {
    Ok(Value),
    /// JSON-RPC error object
    Error { code: i64, message: String },
    /// Never answers; the caller sees its own timeout
    Hang,
    /// Answers after a delay
    Delayed(Duration, Value),
    /// The process dies mid-request
    Crash,
}

type Handler = Arc<dyn Fn(&str, &McpRequest) -> FakeReply + Send + Sync>;

/// A request observed by a fake transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub server_name: String,
    pub method: String,
    pub params: Option<Value>,
}

struct FakeBackendInner {
    handler: RwLock<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    spawns: AtomicU32,
    fail_spawns: AtomicBool,
    processes: Mutex<Vec<Arc<AtomicBool>>>,
}

/// Shared script and journal for every fake server
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<FakeBackendInner>,
}

impl FakeBackend {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &McpRequest) -> FakeReply + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FakeBackendInner {
                handler: RwLock::new(Arc::new(handler)),
                requests: Mutex::new(Vec::new()),
                spawns: AtomicU32::new(0),
                fail_spawns: AtomicBool::new(false),
                processes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Answers every request with `{server, method, params}`
    pub fn echo() -> Self {
        Self::new(|server, request| {
            FakeReply::Ok(json!({
                "server": server,
                "method": request.method,
                "params": request.params,
            }))
        })
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &McpRequest) -> FakeReply + Send + Sync + 'static,
    {
        *self.inner.handler.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(handler);
    }

    /// Make subsequent spawns fail
    pub fn fail_spawns(&self, fail: bool) {
        self.inner.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> u32 {
        self.inner.spawns.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Requests for `method`, optionally restricted to one server
    pub fn request_count(&self, method: &str, server_name: Option<&str>) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method)
            .filter(|r| server_name.map_or(true, |s| r.server_name == s))
            .count()
    }

    /// Mark every spawned process as exited
    pub fn kill_all(&self) {
        for alive in self.inner.processes.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    fn reply(&self, server_name: &str, request: &McpRequest) -> FakeReply {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                server_name: server_name.to_string(),
                method: request.method.clone(),
                params: request.params.clone(),
            });
        let handler = Arc::clone(&self.inner.handler.read().unwrap_or_else(|e| e.into_inner()));
        handler(server_name, request)
    }
}

/// In-memory transport bound to a [`FakeBackend`]
pub struct FakeTransport {
    server_name: String,
    backend: FakeBackend,
    alive: Arc<AtomicBool>,
    pid: u32,
}

#[async_trait]
impl McpTransport for FakeTransport {
    async fn send_request(&self, request: McpRequest, timeout: Duration) -> Result<Value> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(GatewayError::crashed(&self.server_name, "process exited"));
        }
        let timed_out = || GatewayError::RequestTimeout {
            server: self.server_name.clone(),
            method: request.method.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        match self.backend.reply(&self.server_name, &request) {
            FakeReply::Ok(value) => Ok(value),
            FakeReply::Error { code, message } => Err(GatewayError::Backend {
                server: self.server_name.clone(),
                code,
                message,
            }),
            FakeReply::Hang => {
                tokio::time::sleep(timeout).await;
                Err(timed_out())
            }
            FakeReply::Delayed(delay, value) => {
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    Err(timed_out())
                } else {
                    tokio::time::sleep(delay).await;
                    Ok(value)
                }
            }
            FakeReply::Crash => {
                self.alive.store(false, Ordering::SeqCst);
                Err(GatewayError::crashed(&self.server_name, "fake crash"))
            }
        }
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// Factory handing out [`FakeTransport`]s
#[derive(Clone)]
pub struct FakeTransportFactory {
    backend: FakeBackend,
}

static NEXT_PID: AtomicUsize = AtomicUsize::new(10_000);

impl FakeTransportFactory {
    pub fn new(backend: FakeBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &FakeBackend {
        &self.backend
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn spawn(&self, server_name: &str, _config: &ServerConfig) -> Result<Arc<dyn McpTransport>> {
        if self.backend.inner.fail_spawns.load(Ordering::SeqCst) {
            return Err(GatewayError::spawn(server_name, "spawn disabled by test"));
        }
        self.backend.inner.spawns.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.backend
            .inner
            .processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&alive));
        Ok(Arc::new(FakeTransport {
            server_name: server_name.to_string(),
            backend: self.backend.clone(),
            alive,
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst) as u32,
        }))
    }
}

/// Observer that keeps every event it sees
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<GatewayEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: Fn(&GatewayEvent) -> bool,
    {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventObserver for RecordingObserver {
    fn on_event(&self, event: &GatewayEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
