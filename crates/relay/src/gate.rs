//! Permission gate: suspend a command dispatch until an external allow/deny
//! decision arrives, denying by default on timeout.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, RelayEvent};

pub struct PermissionGate {
    events: EventBus,
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl PermissionGate {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a decision request and wait for the answer.
    ///
    /// Returns `true` only when an explicit allow arrives before the
    /// deadline. Explicit deny, timeout and a missing decision source all
    /// return `false`; the gate fails closed.
    pub async fn request_decision(
        &self,
        explanation: &str,
        action_description: &str,
        timeout: Duration,
    ) -> bool {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        self.events.emit(RelayEvent::PermissionRequest {
            request_id: request_id.clone(),
            explanation: explanation.to_string(),
            action_description: action_description.to_string(),
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(allowed)) => {
                info!(request_id = %request_id, allowed, "Permission decision received");
                allowed
            }
            Ok(Err(_)) => {
                // Sender dropped without answering; treat as deny.
                debug!(request_id = %request_id, "Permission request abandoned");
                false
            }
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&request_id);
                warn!(request_id = %request_id, "Permission request timed out, denying");
                false
            }
        }
    }

    /// Route an external decision to the dispatch waiting on it.
    /// Decisions for unknown (expired or already answered) ids are dropped.
    pub async fn resolve(&self, request_id: &str, allowed: bool) {
        let mut pending = self.pending.lock().await;
        match pending.remove(request_id) {
            Some(tx) => {
                let _ = tx.send(allowed);
                debug!(request_id = %request_id, allowed, "Decision routed");
            }
            None => {
                debug!(request_id = %request_id, "No pending permission request for decision");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request_id_of(event: RelayEvent) -> String {
        match event {
            RelayEvent::PermissionRequest { request_id, .. } => request_id,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_allow() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let gate = Arc::new(PermissionGate::new(events));

        let gate_clone = Arc::clone(&gate);
        let waiter = tokio::spawn(async move {
            gate_clone
                .request_decision("x", "click at (1, 2)", Duration::from_secs(5))
                .await
        });

        let request_id = request_id_of(rx.recv().await.unwrap());
        gate.resolve(&request_id, true).await;
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_explicit_deny() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let gate = Arc::new(PermissionGate::new(events));

        let gate_clone = Arc::clone(&gate);
        let waiter = tokio::spawn(async move {
            gate_clone
                .request_decision("x", "click at (1, 2)", Duration::from_secs(5))
                .await
        });

        let request_id = request_id_of(rx.recv().await.unwrap());
        gate.resolve(&request_id, false).await;
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_timeout_denies() {
        let gate = PermissionGate::new(EventBus::new(8));
        let allowed = gate
            .request_decision("x", "risky thing", Duration::from_millis(20))
            .await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_no_observer_denies() {
        // No subscriber on the bus at all; the gate must still resolve.
        let gate = PermissionGate::new(EventBus::new(8));
        let allowed = gate
            .request_decision("x", "anything", Duration::from_millis(20))
            .await;
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_stale_decision_ignored() {
        let gate = PermissionGate::new(EventBus::new(8));
        // Resolving an id nobody is waiting on must not panic or leak.
        gate.resolve("no-such-request", true).await;
    }
}
