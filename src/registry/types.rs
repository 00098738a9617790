//! Registry types

use serde::{Deserialize, Serialize};

/// Last known health of a backend server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Bonus used by capability-based scoring
    pub fn score_bonus(&self) -> i64 {
        match self {
            HealthStatus::Healthy => 3,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        write!(f, "{}", name)
    }
}

/// A configured backend server as the router sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredServer {
    pub name: String,
    pub capabilities: Vec<String>,
    pub category: Option<String>,
    pub priority: i32,
    pub critical: bool,
    pub health: HealthStatus,
}

impl RegisteredServer {
    /// Exact capability match, or a declared `prefix.*` / `prefix` covering the method
    pub fn has_capability(&self, method: &str) -> bool {
        self.capabilities.iter().any(|cap| capability_covers(cap, method))
    }

    pub fn has_exact_capability(&self, method: &str) -> bool {
        self.capabilities.iter().any(|cap| cap == method)
    }
}

/// Whether a declared capability covers a method name.
///
/// `file.read` covers only itself; `file.*` and `file` cover `file.read`.
pub fn capability_covers(capability: &str, method: &str) -> bool {
    if capability == method {
        return true;
    }
    let prefix = capability.strip_suffix(".*").unwrap_or(capability);
    method
        .strip_prefix(prefix)
        .map_or(false, |rest| rest.starts_with('.') || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_covers() {
        assert!(capability_covers("file.read", "file.read"));
        assert!(!capability_covers("file.read", "file.write"));
        assert!(capability_covers("file.*", "file.write"));
        assert!(capability_covers("file", "file.write"));
        assert!(capability_covers("tools", "tools/list"));
        assert!(!capability_covers("file", "filesystem.read"));
    }

    #[test]
    fn test_health_bonus() {
        assert_eq!(HealthStatus::Healthy.score_bonus(), 3);
        assert_eq!(HealthStatus::Degraded.score_bonus(), 1);
        assert_eq!(HealthStatus::Unhealthy.score_bonus(), 0);
    }
}
