use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use tabrelay_actions::{cdp::CdpClient, ActionContext, ActionRegistry};
use tabrelay_core::{Config, Paths};
use tabrelay_relay::{CommandRelay, CorrelatedChannel, EventBus, PermissionGate, RelayEvent};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Run the relay daemon: connect to the browser tab, open the controller
/// channel and dispatch commands until interrupted.
pub async fn run(
    endpoint: Option<String>,
    cdp_url: Option<String>,
    detached: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    if let Some(endpoint) = endpoint {
        config.relay.endpoint = endpoint;
    }
    if let Some(cdp_url) = cdp_url {
        config.browser.cdp_url = cdp_url;
    }

    let browser = if detached {
        info!("Running detached, browser actions will report errors");
        None
    } else {
        let timeout = Duration::from_millis(config.browser.cdp_timeout_ms);
        match CdpClient::connect(&config.browser.cdp_url, timeout).await {
            Ok(client) => {
                info!(url = %config.browser.cdp_url, "Browser connected");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(url = %config.browser.cdp_url, error = %e, "Browser unavailable, continuing");
                None
            }
        }
    };

    let events = EventBus::default();
    let (command_tx, command_rx) = mpsc::channel(64);
    let channel = Arc::new(CorrelatedChannel::new(
        events.clone(),
        command_tx,
        Duration::from_millis(config.relay.request_timeout_ms),
    ));
    let gate = Arc::new(PermissionGate::new(events.clone()));
    let registry = Arc::new(ActionRegistry::with_builtins());
    info!(actions = registry.action_names().len(), "Action table ready");

    let ctx = ActionContext {
        browser,
        config: config.clone(),
    };
    let relay = Arc::new(CommandRelay::new(
        registry,
        channel.clone(),
        gate.clone(),
        events.clone(),
        ctx,
        Duration::from_millis(config.relay.confirm_timeout_ms),
    ));
    tokio::spawn(relay.run(command_rx));

    // Forward gate requests and action outcomes to the controller, and
    // route inbound permission decisions back into the gate.
    tokio::spawn(forward_events(
        events.clone(),
        channel.clone(),
        gate.clone(),
    ));

    let endpoint = config.relay.endpoint.clone();
    let supervisor_channel = channel.clone();
    tokio::spawn(async move {
        loop {
            if !supervisor_channel.is_open().await {
                match supervisor_channel.open(&endpoint).await {
                    Ok(()) => info!(endpoint = %endpoint, "Controller channel open"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Connect failed, retrying"),
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    channel.close().await;
    Ok(())
}

async fn forward_events(
    events: EventBus,
    channel: Arc<CorrelatedChannel>,
    gate: Arc<PermissionGate>,
) {
    let mut rx = events.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event forwarder lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        match event {
            RelayEvent::PermissionRequest { .. } | RelayEvent::ActionOutcome { .. } => {
                channel.send_event(event.to_wire()).await;
            }
            RelayEvent::PassThrough { payload } => {
                if payload.get("type").and_then(|t| t.as_str()) == Some("permission_decision") {
                    let request_id = payload
                        .get("request_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let allowed = payload
                        .get("allowed")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    gate.resolve(request_id, allowed).await;
                }
            }
            RelayEvent::Connected { .. } | RelayEvent::Disconnected { .. } => {}
        }
    }
}
