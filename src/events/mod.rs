//! Typed event bus
//!
//! The connection manager and the gateway publish [`GatewayEvent`]s; the
//! monitoring service and tests subscribe through [`EventObserver`].

use crate::config::EvictionPolicy;
use crate::pool::{CircuitState, ConnectionState};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

/// Everything the core reports to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    ConnectionCreated {
        server_name: String,
        connection_id: String,
    },
    ConnectionFailed {
        server_name: String,
        error: String,
    },
    ConnectionStateChanged {
        server_name: String,
        connection_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    CircuitStateChanged {
        server_name: String,
        connection_id: String,
        from: CircuitState,
        to: CircuitState,
    },
    ProcessRestarted {
        server_name: String,
        connection_id: String,
        success: bool,
    },
    /// One `execute_request` on the connection manager, after all attempts
    RequestCompleted {
        server_name: String,
        connection_id: String,
        method: String,
        response_time_ms: u64,
        success: bool,
        attempts: u32,
        error_code: Option<String>,
    },
    HealthCheckCompleted {
        server_name: String,
        connection_id: String,
        healthy: bool,
        response_time_ms: Option<u64>,
    },
    CacheHit {
        method: String,
        key: String,
    },
    CacheEviction {
        key: String,
        policy: EvictionPolicy,
    },
    /// Final outcome of `ServerGateway::execute`
    GatewayRequest {
        request_id: String,
        method: String,
        server_name: Option<String>,
        success: bool,
        from_cache: bool,
        response_time_ms: u64,
        retry_count: u32,
        error_code: Option<String>,
    },
    ShutdownStarted,
}

impl GatewayEvent {
    /// Server the event concerns, if any
    pub fn server_name(&self) -> Option<&str> {
        match self {
            GatewayEvent::ConnectionCreated { server_name, .. }
            | GatewayEvent::ConnectionFailed { server_name, .. }
            | GatewayEvent::ConnectionStateChanged { server_name, .. }
            | GatewayEvent::CircuitStateChanged { server_name, .. }
            | GatewayEvent::ProcessRestarted { server_name, .. }
            | GatewayEvent::RequestCompleted { server_name, .. }
            | GatewayEvent::HealthCheckCompleted { server_name, .. } => Some(server_name),
            GatewayEvent::GatewayRequest { server_name, .. } => server_name.as_deref(),
            _ => None,
        }
    }
}

/// Receives events synchronously from the emitting task.
///
/// Implementations must not block; anything slow belongs behind a channel
/// (see [`ChannelObserver`]).
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &GatewayEvent);
}

/// Fan-out of events to every subscribed observer
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<Vec<Arc<dyn EventObserver>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn emit(&self, event: GatewayEvent) {
        trace!(?event, "Emitting gateway event");
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Forwards events into an unbounded channel
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<GatewayEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, event: &GatewayEvent) {
        // Receiver gone means the consumer shut down
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_observer_receives_in_order() {
        let bus = EventBus::new();
        let (observer, mut rx) = ChannelObserver::channel();
        bus.subscribe(observer);

        bus.emit(GatewayEvent::ConnectionFailed {
            server_name: "files".into(),
            error: "spawn failed".into(),
        });
        bus.emit(GatewayEvent::ShutdownStarted);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.server_name(), Some("files"));
        assert_eq!(rx.recv().await.unwrap(), GatewayEvent::ShutdownStarted);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = GatewayEvent::CacheHit {
            method: "file.read".into(),
            key: "abc".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cache_hit");
        assert_eq!(json["method"], "file.read");
    }
}
