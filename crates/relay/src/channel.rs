//! The correlated channel: one duplex WebSocket to the controller,
//! multiplexing inbound commands and outbound requests awaiting replies.
//!
//! Inbound frames are routed by shape: frames with a `cmd` field go to the
//! dispatch loop, frames whose `id` matches a pending outbound request
//! resolve that request, everything else is forwarded to observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use tabrelay_core::{Command, CommandResponse, Error, InboundFrame, Result};

use crate::events::{EventBus, RelayEvent};

struct PendingRequest {
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

struct Connection {
    endpoint: String,
    ws_tx: mpsc::Sender<String>,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

pub struct CorrelatedChannel {
    events: EventBus,
    command_tx: mpsc::Sender<Command>,
    pending: PendingMap,
    /// Default deadline for `request`.
    request_timeout: Duration,
    /// Zero or one live connection; replacing it tears the old one down.
    current: Mutex<Option<Connection>>,
}

impl CorrelatedChannel {
    pub fn new(
        events: EventBus,
        command_tx: mpsc::Sender<Command>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            events,
            command_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout,
            current: Mutex::new(None),
        }
    }

    /// Open the channel. Idempotent while a connection is live: a second
    /// call returns without opening a second socket, so there is never more
    /// than one dispatch stream. Callers decide their own retry policy.
    pub async fn open(&self, endpoint: &str) -> Result<()> {
        Url::parse(endpoint)
            .map_err(|e| Error::Connection(format!("Invalid endpoint {}: {}", endpoint, e)))?;

        {
            let mut current = self.current.lock().await;
            if let Some(conn) = current.take() {
                if !conn.reader_handle.is_finished() {
                    debug!(endpoint = %conn.endpoint, "Channel already open, reusing connection");
                    *current = Some(conn);
                    return Ok(());
                }
                // The previous connection died on its own; its reader already
                // rejected pending requests. Drop the stale handle.
                conn.writer_handle.abort();
            }
        }

        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        // Handshake without holding the lock; the send paths and `is_open`
        // must stay responsive while a connect attempt is in flight.
        let (ws_stream, _) = connect_async(endpoint).await.map_err(|e| {
            Error::Connection(format!("Failed to connect to {}: {}", endpoint, e))
        })?;
        info!(endpoint = %endpoint, "Channel connected");

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        // Writer task: owns the sink, forwards frames from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("Channel write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: routes inbound frames until the stream ends, then
        // rejects every still-pending request so nothing waits forever.
        let pending = self.pending.clone();
        let command_tx = self.command_tx.clone();
        let events = self.events.clone();
        let reader_handle = tokio::spawn(async move {
            let reason = loop {
                match ws_read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let value = match serde_json::from_str::<Value>(&text) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(error = %e, "Ignoring invalid JSON frame");
                                continue;
                            }
                        };
                        route_frame(value, &pending, &command_tx, &events).await;
                    }
                    Some(Ok(Message::Close(_))) => break "closed by peer".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {}", e),
                    None => break "stream ended".to_string(),
                }
            };
            info!(reason = %reason, "Channel disconnected");
            reject_all_pending(&pending).await;
            events.emit(RelayEvent::Disconnected { reason });
        });

        let mut current = self.current.lock().await;
        if let Some(conn) = current.as_ref() {
            if !conn.reader_handle.is_finished() {
                // Lost a race with a concurrent open; keep the live
                // connection and discard this one.
                debug!(endpoint = %endpoint, "Concurrent open won, dropping duplicate connection");
                reader_handle.abort();
                writer_handle.abort();
                return Ok(());
            }
        }
        *current = Some(Connection {
            endpoint: endpoint.to_string(),
            ws_tx,
            reader_handle,
            writer_handle,
        });
        self.events.emit(RelayEvent::Connected {
            endpoint: endpoint.to_string(),
        });
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        let current = self.current.lock().await;
        matches!(current.as_ref(), Some(conn) if !conn.reader_handle.is_finished())
    }

    /// Send a response to a command. Fire-and-forget: a stale response on a
    /// closed channel is logged and dropped, never an error.
    pub async fn send_response(&self, response: &CommandResponse) {
        match serde_json::to_string(response) {
            Ok(text) => self.send_text(text).await,
            Err(e) => warn!(error = %e, "Failed to serialize response"),
        }
    }

    /// Send an out-of-band `{type, ...}` frame. Same fire-and-forget policy
    /// as responses.
    pub async fn send_event(&self, payload: Value) {
        self.send_text(payload.to_string()).await;
    }

    async fn send_text(&self, text: String) {
        let ws_tx = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(conn) if !conn.reader_handle.is_finished() => conn.ws_tx.clone(),
                _ => {
                    warn!("Channel not open, dropping outbound frame");
                    return;
                }
            }
        };
        if ws_tx.send(text).await.is_err() {
            warn!("Channel writer gone, dropping outbound frame");
        }
    }

    /// `send_request` with the channel's configured default deadline.
    pub async fn request(&self, payload: Value) -> Result<Value> {
        self.send_request(payload, self.request_timeout).await
    }

    /// Send a request to the controller and wait for the reply carrying the
    /// same id. On timeout the pending entry is removed so a late reply
    /// cannot resolve a stale future and degrades to a pass-through event.
    pub async fn send_request(&self, payload: Value, timeout: Duration) -> Result<Value> {
        let ws_tx = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(conn) if !conn.reader_handle.is_finished() => conn.ws_tx.clone(),
                _ => return Err(Error::ConnectionClosed),
            }
        };

        let mut payload = payload;
        let obj = payload
            .as_object_mut()
            .ok_or_else(|| Error::Validation("request payload must be a JSON object".to_string()))?;
        let id = Uuid::new_v4().to_string();
        obj.insert("id".to_string(), json!(id));

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id.clone(),
                PendingRequest {
                    created_at: Utc::now(),
                    tx,
                },
            );
        }

        if ws_tx.send(payload.to_string()).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if let Some(entry) = pending.remove(&id) {
                    let age = Utc::now() - entry.created_at;
                    debug!(id = %id, age_ms = age.num_milliseconds(), "Pending request expired");
                }
                Err(Error::Timeout(format!(
                    "No reply within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Close the channel: reject all pending requests and drop the
    /// connection. The handle is unusable until the next `open`.
    pub async fn close(&self) {
        let conn = self.current.lock().await.take();
        if let Some(conn) = conn {
            conn.reader_handle.abort();
            conn.writer_handle.abort();
            reject_all_pending(&self.pending).await;
            self.events.emit(RelayEvent::Disconnected {
                reason: "closed locally".to_string(),
            });
        }
    }
}

async fn route_frame(
    value: Value,
    pending: &PendingMap,
    command_tx: &mpsc::Sender<Command>,
    events: &EventBus,
) {
    match InboundFrame::classify(value) {
        InboundFrame::Command(command) => {
            debug!(id = %command.id, cmd = %command.cmd, "Inbound command");
            if command_tx.send(command).await.is_err() {
                warn!("Dispatch loop gone, dropping command");
            }
        }
        InboundFrame::Other { id: Some(id), payload } => {
            let entry = {
                let mut pending = pending.lock().await;
                pending.remove(&id)
            };
            match entry {
                Some(entry) => {
                    let _ = entry.tx.send(Ok(payload));
                }
                None => {
                    // Late or foreign reply; observers may still want it.
                    events.emit(RelayEvent::PassThrough { payload });
                }
            }
        }
        InboundFrame::Other { id: None, payload } => {
            events.emit(RelayEvent::PassThrough { payload });
        }
    }
}

async fn reject_all_pending(pending: &PendingMap) {
    let mut pending = pending.lock().await;
    let count = pending.len();
    for (_, entry) in pending.drain() {
        let _ = entry.tx.send(Err(Error::ConnectionClosed));
    }
    if count > 0 {
        warn!(count, "Rejected pending requests on disconnect");
    }
}
