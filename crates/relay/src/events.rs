//! Broadcast bus for out-of-band relay events.
//!
//! Observers (a UI, the binary's wire forwarder) subscribe here; emitting
//! with no subscribers is fine; nothing the relay's correctness depends on
//! flows through this bus except the permission request, and the gate fails
//! closed when nobody answers it.

use serde_json::{json, Value};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connected {
        endpoint: String,
    },
    Disconnected {
        reason: String,
    },
    PermissionRequest {
        request_id: String,
        explanation: String,
        action_description: String,
    },
    ActionOutcome {
        cmd: String,
        description: String,
    },
    /// Inbound frame that was neither a command nor a pending reply,
    /// forwarded unmodified.
    PassThrough {
        payload: Value,
    },
}

impl RelayEvent {
    /// Wire rendering: `{type, ...}`. Pass-through payloads keep their
    /// original shape.
    pub fn to_wire(&self) -> Value {
        match self {
            RelayEvent::Connected { endpoint } => {
                json!({"type": "connected", "endpoint": endpoint})
            }
            RelayEvent::Disconnected { reason } => {
                json!({"type": "disconnected", "reason": reason})
            }
            RelayEvent::PermissionRequest {
                request_id,
                explanation,
                action_description,
            } => json!({
                "type": "permission_request",
                "request_id": request_id,
                "explanation": explanation,
                "action_description": action_description,
            }),
            RelayEvent::ActionOutcome { cmd, description } => {
                json!({"type": "server_output", "cmd": cmd, "text": description})
            }
            RelayEvent::PassThrough { payload } => payload.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(RelayEvent::Connected {
            endpoint: "ws://localhost".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(RelayEvent::ActionOutcome {
            cmd: "click".to_string(),
            description: "clicked at (1, 2)".to_string(),
        });
        match rx.recv().await.unwrap() {
            RelayEvent::ActionOutcome { cmd, .. } => assert_eq!(cmd, "click"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_wire_rendering() {
        let event = RelayEvent::PermissionRequest {
            request_id: "r1".to_string(),
            explanation: "dangerous".to_string(),
            action_description: "click at (1, 2)".to_string(),
        };
        let wire = event.to_wire();
        assert_eq!(wire["type"], "permission_request");
        assert_eq!(wire["request_id"], "r1");

        let payload = json!({"type": "telemetry", "n": 1});
        let event = RelayEvent::PassThrough {
            payload: payload.clone(),
        };
        assert_eq!(event.to_wire(), payload);
    }
}
