//! Backend MCP server plumbing: JSON-RPC envelope and transports

pub mod external_process;
pub mod jsonrpc;
pub mod transport;

pub use external_process::StdioTransport;
pub use jsonrpc::{McpRequest, McpResponse, McpRpcError};
pub use transport::{McpTransport, ProcessTransportFactory, TransportFactory};
