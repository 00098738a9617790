//! Transport abstraction over a single backend MCP server

use crate::config::ServerConfig;
use crate::error::Result;
use crate::mcp::jsonrpc::McpRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A live channel to one backend process
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait up to `timeout` for its result.
    ///
    /// A JSON-RPC error object from the backend surfaces as
    /// `GatewayError::Backend`; a response arriving after the timeout is
    /// discarded.
    async fn send_request(&self, request: McpRequest, timeout: Duration) -> Result<Value>;

    /// Whether the backend process is still running
    async fn is_alive(&self) -> bool;

    /// Terminate the backend and release its pipes
    async fn shutdown(&self) -> Result<()>;

    /// OS process id when backed by a real process
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Creates transports for configured servers
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn spawn(&self, server_name: &str, config: &ServerConfig) -> Result<Arc<dyn McpTransport>>;
}

/// Production factory: one child process per transport
#[derive(Debug, Default, Clone)]
pub struct ProcessTransportFactory;

#[async_trait]
impl TransportFactory for ProcessTransportFactory {
    async fn spawn(&self, server_name: &str, config: &ServerConfig) -> Result<Arc<dyn McpTransport>> {
        let transport = super::external_process::StdioTransport::start(server_name, config)?;
        Ok(Arc::new(transport))
    }
}
