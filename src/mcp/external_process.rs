//! Stdio transport for external MCP server processes
//!
//! Spawns the configured command with piped stdio and speaks newline
//! delimited JSON-RPC over stdin/stdout. Responses are correlated to pending
//! requests by id; stderr is drained and its last line kept as the crash
//! reason.

use crate::config::{expand_env_vars, ServerConfig};
use crate::error::{GatewayError, Result};
use crate::mcp::jsonrpc::{McpRequest, McpResponse};
use crate::mcp::transport::McpTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type PendingRequests = Arc<Mutex<HashMap<String, oneshot::Sender<McpResponse>>>>;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A single backend process reached over stdin/stdout
pub struct StdioTransport {
    /// Server name from configuration
    name: String,
    /// The spawned child process
    process: std::sync::Mutex<Option<Child>>,
    /// Channel feeding the stdin writer task
    stdin_sender: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Pending requests waiting for responses
    pending_requests: PendingRequests,
    /// Cleared once stdout closes
    alive: Arc<AtomicBool>,
    last_stderr: Arc<std::sync::Mutex<Option<String>>>,
    pid: Option<u32>,
    start_time: Instant,
}

impl StdioTransport {
    /// Spawn the server process and wire up its pipes
    pub fn start(name: &str, config: &ServerConfig) -> Result<Self> {
        info!("Starting MCP server process: {}", name);

        let mut cmd = Command::new(expand_env_vars(&config.command));
        cmd.args(config.args.iter().map(|arg| expand_env_vars(arg)));
        for (key, value) in &config.env {
            cmd.env(key, expand_env_vars(value));
        }
        if let Some(ref cwd) = config.cwd {
            cmd.current_dir(expand_env_vars(cwd));
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::spawn(name, e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::spawn(name, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::spawn(name, "stdout not captured"))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        let transport = Self {
            name: name.to_string(),
            process: std::sync::Mutex::new(None),
            stdin_sender: std::sync::Mutex::new(None),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            alive: Arc::new(AtomicBool::new(true)),
            last_stderr: Arc::new(std::sync::Mutex::new(None)),
            pid,
            start_time: Instant::now(),
        };

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let server_name = transport.name.clone();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(message) = stdin_rx.recv().await {
                let written = async {
                    stdin.write_all(message.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    error!("Failed to write to MCP server '{}' stdin: {}", server_name, e);
                    break;
                }
            }
        });

        let pending_requests = Arc::clone(&transport.pending_requests);
        let alive = Arc::clone(&transport.alive);
        let server_name = transport.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                debug!("MCP server '{}' stdout: {}", server_name, line);
                match serde_json::from_str::<McpResponse>(&line) {
                    Ok(response) => {
                        let id = response.id_key();
                        let sender = pending_requests.lock().await.remove(&id);
                        match sender {
                            Some(sender) => {
                                let _ = sender.send(response);
                            }
                            None => debug!(
                                "Discarding response {} from '{}' with no pending request",
                                id, server_name
                            ),
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse JSON-RPC response from MCP server '{}': {} (line: {})", server_name, e, line);
                    }
                }
            }

            warn!("MCP server '{}' stdout reader ended", server_name);
            alive.store(false, Ordering::SeqCst);
            // Dropping the senders fails every waiter with a disconnect
            pending_requests.lock().await.clear();
        });

        if let Some(stderr) = stderr {
            let last_stderr = Arc::clone(&transport.last_stderr);
            let server_name = transport.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!("MCP server '{}' stderr: {}", server_name, line);
                    *last_stderr.lock().unwrap_or_else(|e| e.into_inner()) = Some(line);
                }
            });
        }

        *transport.stdin_sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(stdin_tx);
        *transport.process.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);

        info!("Started MCP server '{}' (pid {:?})", name, pid);
        Ok(transport)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Last stderr line, used as the disconnect reason
    fn exit_reason(&self) -> String {
        self.last_stderr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "process exited".to_string())
    }

    fn into_result(&self, response: McpResponse) -> Result<Value> {
        match response.error {
            Some(err) => Err(GatewayError::Backend {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, mut request: McpRequest, request_timeout: Duration) -> Result<Value> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(GatewayError::crashed(&self.name, self.exit_reason()));
        }

        let request_id = match request.id_key() {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                request.id = Some(Value::String(id.clone()));
                id
            }
        };
        let request_json = serde_json::to_string(&request)?;
        debug!("Sending MCP request to '{}': {}", self.name, request_json);

        let (response_tx, response_rx) = oneshot::channel();
        self.pending_requests
            .lock()
            .await
            .insert(request_id.clone(), response_tx);

        let sent = self
            .stdin_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|sender| sender.send(request_json).is_ok())
            .unwrap_or(false);
        if !sent {
            self.pending_requests.lock().await.remove(&request_id);
            return Err(GatewayError::crashed(&self.name, "stdin closed"));
        }

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(response)) => self.into_result(response),
            Ok(Err(_)) => Err(GatewayError::crashed(&self.name, self.exit_reason())),
            Err(_) => {
                // A late response finds no waiter and is dropped by the reader
                self.pending_requests.lock().await.remove(&request_id);
                Err(GatewayError::RequestTimeout {
                    server: self.name.clone(),
                    method: request.method,
                    timeout_ms: request_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let mut process = self.process.lock().unwrap_or_else(|e| e.into_inner());
        match process.as_mut().map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!("MCP server '{}' exited with status: {}", self.name, status);
                self.alive.store(false, Ordering::SeqCst);
                false
            }
            Some(Err(e)) => {
                warn!("Failed to poll MCP server '{}': {}", self.name, e);
                false
            }
            None => false,
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Stopping MCP server process: {}", self.name);
        self.alive.store(false, Ordering::SeqCst);
        self.stdin_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let child = self.process.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut process) = child {
            if !terminate(&self.name, &process) {
                if let Err(e) = process.start_kill() {
                    warn!("Failed to kill MCP server '{}': {}", self.name, e);
                }
            }
            match timeout(SHUTDOWN_GRACE, process.wait()).await {
                Ok(Ok(status)) => info!("MCP server '{}' exited with status: {}", self.name, status),
                Ok(Err(e)) => error!("Error waiting for MCP server '{}' to exit: {}", self.name, e),
                Err(_) => {
                    warn!("MCP server '{}' ignored SIGTERM for {:?}, killing", self.name, SHUTDOWN_GRACE);
                    if let Err(e) = process.kill().await {
                        error!("Failed to kill MCP server '{}': {}", self.name, e);
                    }
                }
            }
        }

        self.pending_requests.lock().await.clear();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Ask the child to exit with SIGTERM; false when no signal was delivered
#[cfg(unix)]
fn terminate(name: &str, process: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = process.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send SIGTERM to MCP server '{}' (pid {}): {}", name, pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(_name: &str, _process: &Child) -> bool {
    false
}
