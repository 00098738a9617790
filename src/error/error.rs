//! Error types and handling for the MCP Gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the MCP Gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No pooled connection became available in time
    #[error("Connection timeout for server '{server}' after {waited_ms}ms")]
    ConnectionTimeout { server: String, waited_ms: u64 },

    /// Backend process could not be started
    #[error("Failed to spawn MCP server '{server}': {message}")]
    ProcessSpawn { server: String, message: String },

    /// Backend process exited or its pipes closed
    #[error("MCP server '{server}' disconnected: {message}")]
    ProcessCrashed { server: String, message: String },

    /// No response within the per-attempt timeout
    #[error("Request '{method}' to '{server}' timed out after {timeout_ms}ms")]
    RequestTimeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// Circuit breaker rejected the call without contacting the backend
    #[error("Circuit breaker open for server '{server}', retry after {retry_after_ms}ms")]
    CircuitOpen { server: String, retry_after_ms: u64 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Method is not in the allow list or the caller lacks permission
    #[error("Unauthorized method: {method}")]
    UnauthorizedMethod { method: String },

    /// Method is explicitly blocked
    #[error("Blocked method: {method}")]
    BlockedMethod { method: String },

    /// No configured server can service the method
    #[error("No available server for method: {method}")]
    NoCapableServer { method: String },

    /// Transport level failure (stdin closed, serialization of the envelope)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The backend answered with a JSON-RPC error object
    #[error("Backend error {code} from '{server}': {message}")]
    Backend {
        server: String,
        code: i64,
        message: String,
    },

    /// Background queue is at capacity
    #[error("Request queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    /// Gateway is shutting down
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Generic gateway failure
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
        }
    }

    /// Create a process spawn error
    pub fn spawn<S: Into<String>, M: Into<String>>(server: S, message: M) -> Self {
        Self::ProcessSpawn {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a process crashed error
    pub fn crashed<S: Into<String>, M: Into<String>>(server: S, message: M) -> Self {
        Self::ProcessCrashed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Whether the gateway retry loop may try this error again.
    ///
    /// Static mismatches (routing, authorization) and open breakers fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectionTimeout { .. }
                | GatewayError::ProcessSpawn { .. }
                | GatewayError::ProcessCrashed { .. }
                | GatewayError::RequestTimeout { .. }
                | GatewayError::Transport { .. }
                | GatewayError::Backend { .. }
                | GatewayError::Io(_)
                | GatewayError::Http(_)
        )
    }

    /// Stable error code exposed in `Response.error.code`
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config { .. } => "CONFIG_ERROR",
            GatewayError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            GatewayError::ProcessSpawn { .. } => "PROCESS_SPAWN_FAILURE",
            GatewayError::ProcessCrashed { .. } => "PROCESS_DISCONNECTED",
            GatewayError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::UnauthorizedMethod { .. } => "UNAUTHORIZED_METHOD",
            GatewayError::BlockedMethod { .. } => "BLOCKED_METHOD",
            GatewayError::NoCapableServer { .. } => "NO_AVAILABLE_SERVER",
            GatewayError::Transport { .. } => "TRANSPORT_ERROR",
            GatewayError::Backend { .. } => "BACKEND_ERROR",
            GatewayError::QueueFull { .. } => "QUEUE_FULL",
            GatewayError::ShuttingDown => "SHUTTING_DOWN",
            GatewayError::Internal { .. } => "GATEWAY_INTERNAL_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Serde(_) => "SERIALIZATION_ERROR",
            GatewayError::Yaml(_) => "CONFIG_ERROR",
            GatewayError::Http(_) => "HTTP_ERROR",
        }
    }

    /// Get the error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Config { .. } | GatewayError::Yaml(_) => "config",
            GatewayError::ConnectionTimeout { .. }
            | GatewayError::ProcessSpawn { .. }
            | GatewayError::ProcessCrashed { .. } => "connection",
            GatewayError::RequestTimeout { .. } => "timeout",
            GatewayError::CircuitOpen { .. } => "circuit_breaker",
            GatewayError::RateLimitExceeded { .. } => "rate_limit",
            GatewayError::UnauthorizedMethod { .. } | GatewayError::BlockedMethod { .. } => {
                "security"
            }
            GatewayError::NoCapableServer { .. } => "routing",
            GatewayError::Transport { .. } | GatewayError::Io(_) => "transport",
            GatewayError::Backend { .. } => "backend",
            GatewayError::QueueFull { .. } | GatewayError::ShuttingDown => "queue",
            GatewayError::Internal { .. } => "internal",
            GatewayError::Serde(_) => "serialization",
            GatewayError::Http(_) => "http",
        }
    }
}

impl Clone for GatewayError {
    fn clone(&self) -> Self {
        match self {
            GatewayError::Config { message } => GatewayError::Config { message: message.clone() },
            GatewayError::ConnectionTimeout { server, waited_ms } => GatewayError::ConnectionTimeout {
                server: server.clone(),
                waited_ms: *waited_ms,
            },
            GatewayError::ProcessSpawn { server, message } => GatewayError::ProcessSpawn {
                server: server.clone(),
                message: message.clone(),
            },
            GatewayError::ProcessCrashed { server, message } => GatewayError::ProcessCrashed {
                server: server.clone(),
                message: message.clone(),
            },
            GatewayError::RequestTimeout { server, method, timeout_ms } => GatewayError::RequestTimeout {
                server: server.clone(),
                method: method.clone(),
                timeout_ms: *timeout_ms,
            },
            GatewayError::CircuitOpen { server, retry_after_ms } => GatewayError::CircuitOpen {
                server: server.clone(),
                retry_after_ms: *retry_after_ms,
            },
            GatewayError::RateLimitExceeded { message } => GatewayError::RateLimitExceeded { message: message.clone() },
            GatewayError::UnauthorizedMethod { method } => GatewayError::UnauthorizedMethod { method: method.clone() },
            GatewayError::BlockedMethod { method } => GatewayError::BlockedMethod { method: method.clone() },
            GatewayError::NoCapableServer { method } => GatewayError::NoCapableServer { method: method.clone() },
            GatewayError::Transport { message } => GatewayError::Transport { message: message.clone() },
            GatewayError::Backend { server, code, message } => GatewayError::Backend {
                server: server.clone(),
                code: *code,
                message: message.clone(),
            },
            GatewayError::QueueFull { capacity } => GatewayError::QueueFull { capacity: *capacity },
            GatewayError::ShuttingDown => GatewayError::ShuttingDown,
            GatewayError::Internal { message } => GatewayError::Internal { message: message.clone() },

            // For non-cloneable types, convert to string representation
            GatewayError::Io(e) => GatewayError::transport(format!("IO error: {}", e)),
            GatewayError::Serde(e) => GatewayError::internal(format!("Serialization error: {}", e)),
            GatewayError::Yaml(e) => GatewayError::config(format!("YAML error: {}", e)),
            GatewayError::Http(e) => GatewayError::transport(format!("HTTP error: {}", e)),
        }
    }
}
