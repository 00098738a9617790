//! Error handling module for the MCP Gateway
//!
//! This module provides the error taxonomy shared by the connection manager,
//! the gateway and the monitoring service.

mod error;

// Re-export the main error types and utilities
pub use error::{GatewayError, Result};
