//! Method-level security policy

use crate::config::SecurityConfig;
use crate::error::{GatewayError, Result};
use crate::registry::capability_covers;
use crate::routing::types::McpRequestContext;
use tracing::warn;

/// Exact name, `*`, or `prefix.*`
pub fn method_matches(pattern: &str, method: &str) -> bool {
    pattern == "*" || capability_covers(pattern, method)
}

/// Enforces blocked/allowed lists and the caller's context
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    config: SecurityConfig,
}

impl SecurityPolicy {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Reject the call before any routing happens
    pub fn check(&self, method: &str, context: &McpRequestContext) -> Result<()> {
        if self.config.blocked_methods.iter().any(|p| method_matches(p, method)) {
            warn!("🚫 [SECURITY] Blocked method requested: {}", method);
            return Err(GatewayError::BlockedMethod {
                method: method.to_string(),
            });
        }

        if let Some(ref allowed) = self.config.allowed_methods {
            if !allowed.iter().any(|p| method_matches(p, method)) {
                warn!("🚫 [SECURITY] Method not in allow list: {}", method);
                return Err(GatewayError::UnauthorizedMethod {
                    method: method.to_string(),
                });
            }
        }

        if self.config.enforce_permissions
            && !context.permissions.iter().any(|p| method_matches(p, method))
        {
            warn!(
                user = context.user_id.as_deref().unwrap_or("anonymous"),
                "🚫 [SECURITY] Caller lacks permission for {}",
                method
            );
            return Err(GatewayError::UnauthorizedMethod {
                method: method.to_string(),
            });
        }

        if let Some(ref limit) = context.rate_limit {
            if limit.remaining == 0 {
                return Err(GatewayError::rate_limited(format!(
                    "caller exhausted {} requests for {}",
                    limit.limit, method
                )));
            }
        }

        Ok(())
    }
}
