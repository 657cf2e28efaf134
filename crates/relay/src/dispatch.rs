//! The dispatch loop: drains inbound commands, gates unsafe ones, runs the
//! matching action and sends exactly one response per command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tabrelay_actions::{Action, ActionContext, ActionRegistry};
use tabrelay_core::{Command, CommandResponse};

use crate::channel::CorrelatedChannel;
use crate::events::{EventBus, RelayEvent};
use crate::gate::PermissionGate;

/// Wire error for a command refused by the permission gate. Explicit deny
/// and decision timeout produce this same string, so a controller cannot
/// tell whether a human said no or simply walked away.
pub const PERMISSION_DENIED_ERROR: &str = "Permission denied by user";

pub struct CommandRelay {
    registry: Arc<ActionRegistry>,
    channel: Arc<CorrelatedChannel>,
    gate: Arc<PermissionGate>,
    events: EventBus,
    ctx: ActionContext,
    confirm_timeout: Duration,
}

impl CommandRelay {
    pub fn new(
        registry: Arc<ActionRegistry>,
        channel: Arc<CorrelatedChannel>,
        gate: Arc<PermissionGate>,
        events: EventBus,
        ctx: ActionContext,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            channel,
            gate,
            events,
            ctx,
            confirm_timeout,
        }
    }

    /// Drain commands until the channel side closes. Each command runs in
    /// its own task so a slow handler or a pending confirmation never blocks
    /// the next command; responses may therefore arrive out of order.
    pub async fn run(self: Arc<Self>, mut command_rx: mpsc::Receiver<Command>) {
        info!("Dispatch loop started");
        while let Some(command) = command_rx.recv().await {
            let relay = self.clone();
            tokio::spawn(async move {
                let response = relay.clone().dispatch_isolated(command).await;
                relay.channel.send_response(&response).await;
            });
        }
        info!("Dispatch loop stopped");
    }

    /// `dispatch` behind its own task boundary: a handler that panics takes
    /// down the inner task only, and the command still gets its failure
    /// response instead of vanishing.
    pub async fn dispatch_isolated(self: Arc<Self>, command: Command) -> CommandResponse {
        let id = command.id.clone();
        let cmd = command.cmd.clone();
        let handle = tokio::spawn(async move { self.dispatch(&command).await });
        match handle.await {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %id, cmd = %cmd, panicked = e.is_panic(), "Handler task died");
                let reason = if e.is_panic() { "panicked" } else { "was cancelled" };
                CommandResponse::failure(&id, format!("Action error: {} handler {}", cmd, reason))
            }
        }
    }

    /// Resolve one command to its single response.
    ///
    /// Order matters: the gate runs before the table lookup, so a denied
    /// command never reveals whether its name is known.
    pub async fn dispatch(&self, command: &Command) -> CommandResponse {
        if let Some(decision) = command.safety_decision() {
            if decision.requires_confirmation() {
                let description = self.registry.describe_request(&command.cmd, &command.args);
                let allowed = self
                    .gate
                    .request_decision(&decision.explanation, &description, self.confirm_timeout)
                    .await;
                if !allowed {
                    warn!(id = %command.id, cmd = %command.cmd, "Command denied");
                    return CommandResponse::failure(&command.id, PERMISSION_DENIED_ERROR);
                }
                info!(id = %command.id, cmd = %command.cmd, "Command approved");
            }
        }

        let action = match self.registry.get(&command.cmd) {
            Some(action) => action.clone(),
            None => {
                warn!(id = %command.id, cmd = %command.cmd, "Unknown command");
                return CommandResponse::failure(
                    &command.id,
                    format!("unknown cmd: {}", command.cmd),
                );
            }
        };

        debug!(id = %command.id, cmd = %command.cmd, "Executing command");
        match self
            .registry
            .execute(&command.cmd, self.ctx.clone(), command.args.clone())
            .await
        {
            Ok(result) => {
                self.events.emit(RelayEvent::ActionOutcome {
                    cmd: command.cmd.clone(),
                    description: action.describe_outcome(&command.args, &result),
                });
                CommandResponse::success(&command.id, result)
            }
            Err(e) => {
                warn!(id = %command.id, cmd = %command.cmd, error = %e, "Command failed");
                CommandResponse::failure(&command.id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabrelay_actions::Action;
    use tabrelay_core::{Config, Result};

    struct EchoAction {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _ctx: ActionContext, args: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.get("v").cloned().unwrap_or(Value::Null))
        }
    }

    struct FailAction;

    #[async_trait]
    impl Action for FailAction {
        fn name(&self) -> &'static str {
            "fail"
        }

        async fn execute(&self, _ctx: ActionContext, _args: Value) -> Result<Value> {
            Err(tabrelay_core::Error::Action("boom".to_string()))
        }
    }

    struct CrashAction;

    #[async_trait]
    impl Action for CrashAction {
        fn name(&self) -> &'static str {
            "crash"
        }

        async fn execute(&self, _ctx: ActionContext, _args: Value) -> Result<Value> {
            panic!("handler blew up");
        }
    }

    fn build_relay(
        confirm_timeout: Duration,
    ) -> (
        Arc<CommandRelay>,
        Arc<PermissionGate>,
        Arc<AtomicUsize>,
        EventBus,
    ) {
        let events = EventBus::new(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(EchoAction {
            calls: calls.clone(),
        }));
        registry.register(Arc::new(FailAction));
        registry.register(Arc::new(CrashAction));

        let (command_tx, _command_rx) = mpsc::channel(16);
        let channel = Arc::new(CorrelatedChannel::new(
            events.clone(),
            command_tx,
            Duration::from_secs(5),
        ));
        let gate = Arc::new(PermissionGate::new(events.clone()));
        let relay = Arc::new(CommandRelay::new(
            Arc::new(registry),
            channel,
            gate.clone(),
            events.clone(),
            ActionContext::detached(Config::default()),
            confirm_timeout,
        ));
        (relay, gate, calls, events)
    }

    fn gated(cmd: &str, explanation: &str) -> Command {
        Command::new(
            "42",
            cmd,
            json!({
                "v": 7,
                "safety_decision": {
                    "decision": "require_confirmation",
                    "explanation": explanation,
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let (relay, _, calls, _) = build_relay(Duration::from_secs(1));
        let response = relay.dispatch(&Command::new("1", "echo", json!({"v": 5}))).await;
        assert_eq!(response.id, "1");
        assert!(response.ok);
        assert_eq!(response.result, Some(json!(5)));
        assert_eq!(response.error, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command() {
        let (relay, _, _, _) = build_relay(Duration::from_secs(1));
        let response = relay.dispatch(&Command::new("2", "bogus", json!({}))).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("unknown cmd: bogus"));
    }

    #[tokio::test]
    async fn test_dispatch_handler_failure() {
        let (relay, _, _, _) = build_relay(Duration::from_secs(1));
        let response = relay.dispatch(&Command::new("3", "fail", json!({}))).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("Action error: boom"));
    }

    #[tokio::test]
    async fn test_panicking_handler_still_yields_response() {
        let (relay, _, _, _) = build_relay(Duration::from_secs(1));
        let response = relay
            .clone()
            .dispatch_isolated(Command::new("7", "crash", json!({})))
            .await;
        assert_eq!(response.id, "7");
        assert!(!response.ok);
        assert!(response.error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_gated_command_denied() {
        let (relay, gate, calls, events) = build_relay(Duration::from_secs(5));
        let mut event_rx = events.subscribe();

        let deny = tokio::spawn(async move {
            loop {
                if let Ok(RelayEvent::PermissionRequest { request_id, .. }) = event_rx.recv().await
                {
                    gate.resolve(&request_id, false).await;
                    break;
                }
            }
        });

        let response = relay.dispatch(&gated("echo", "navigates away")).await;
        deny.await.unwrap();

        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some(PERMISSION_DENIED_ERROR));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "denied handler must not run");
    }

    #[tokio::test]
    async fn test_gated_command_allowed() {
        let (relay, gate, calls, events) = build_relay(Duration::from_secs(5));
        let mut event_rx = events.subscribe();

        let allow = tokio::spawn(async move {
            loop {
                if let Ok(RelayEvent::PermissionRequest { request_id, .. }) = event_rx.recv().await
                {
                    gate.resolve(&request_id, true).await;
                    break;
                }
            }
        });

        let response = relay.dispatch(&gated("echo", "clicks a button")).await;
        allow.await.unwrap();

        assert!(response.ok);
        assert_eq!(response.result, Some(json!(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gated_command_times_out_to_denial() {
        let (relay, _, calls, _) = build_relay(Duration::from_millis(20));
        let response = relay.dispatch(&gated("echo", "no one is watching")).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some(PERMISSION_DENIED_ERROR));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_runs_before_table_lookup() {
        // A denied command with an unknown name reports the denial, not the
        // missing handler.
        let (relay, _, _, _) = build_relay(Duration::from_millis(20));
        let response = relay.dispatch(&gated("bogus", "unknown and unsafe")).await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some(PERMISSION_DENIED_ERROR));
    }

    #[tokio::test]
    async fn test_unannotated_command_skips_gate() {
        // With no decision source the gate would deny; a command without a
        // safety annotation must never reach it.
        let (relay, _, calls, _) = build_relay(Duration::from_millis(20));
        let response = relay.dispatch(&Command::new("9", "echo", json!({"v": 1}))).await;
        assert!(response.ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
