//! Chrome DevTools Protocol client backing the built-in browser actions.
//!
//! Connects to a tab's debugging WebSocket endpoint, sends commands and
//! matches responses to them by auto-incrementing id.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tabrelay_core::{Error, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request id.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command id.
    next_id: AtomicU64,
    /// Per-command deadline.
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str, command_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Connection(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: resolves pending commands; events are ignored here,
        // the built-in actions only use the request/response direction.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            command_timeout,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Connection(format!("Failed to send CDP command: {}", e)))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(cdp_error) = response.get("error") {
                    Err(Error::Action(format!("CDP error: {}", cdp_error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {:?}",
                    method, self.command_timeout
                )))
            }
        }
    }

    /// Navigate the tab to a URL.
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate JavaScript in the page context and return its value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            return Err(Error::Action(format!("JS exception: {}", exception)));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Take a screenshot and return base64-encoded PNG data.
    pub async fn screenshot(&self) -> Result<String> {
        let result = self
            .send_command("Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Action("No screenshot data returned".to_string()))
    }

    /// Dispatch a mouse event via the Input domain.
    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: i32,
    ) -> Result<()> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    /// Click at page coordinates (press + release).
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.dispatch_mouse_event("mousePressed", x, y, "left", 1)
            .await?;
        self.dispatch_mouse_event("mouseReleased", x, y, "left", 1)
            .await?;
        Ok(())
    }

    /// Move the pointer to page coordinates without clicking.
    pub async fn hover_at(&self, x: f64, y: f64) -> Result<()> {
        self.dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await
    }

    /// Insert text at the focused element (bypasses key events).
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send_command("Input.insertText", json!({"text": text}))
            .await?;
        Ok(())
    }

    /// Press a key or modifier combo like `Enter`, `PageDown` or `Meta+A`.
    pub async fn press_key(&self, combo: &str) -> Result<()> {
        let stroke = KeyStroke::parse(combo)?;
        let mut down = json!({
            "type": "keyDown",
            "key": stroke.key,
            "code": stroke.code,
        });
        if stroke.modifiers != 0 {
            down["modifiers"] = json!(stroke.modifiers);
        }
        if let Some(text) = &stroke.text {
            down["text"] = json!(text);
        }
        self.send_command("Input.dispatchKeyEvent", down).await?;

        let mut up = json!({
            "type": "keyUp",
            "key": stroke.key,
            "code": stroke.code,
        });
        if stroke.modifiers != 0 {
            up["modifiers"] = json!(stroke.modifiers);
        }
        self.send_command("Input.dispatchKeyEvent", up).await?;
        Ok(())
    }

    /// Viewport dimensions as the page sees them.
    pub async fn viewport(&self) -> Result<Value> {
        self.evaluate(
            "({width: window.innerWidth, height: window.innerHeight, \
             devicePixelRatio: window.devicePixelRatio})",
        )
        .await
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// A parsed key combo ready for `Input.dispatchKeyEvent`.
#[derive(Debug, PartialEq)]
struct KeyStroke {
    key: String,
    code: String,
    /// CDP modifier bits: Alt=1, Ctrl=2, Meta=4, Shift=8.
    modifiers: i32,
    /// Set for printable keys so keyDown produces a character.
    text: Option<String>,
}

impl KeyStroke {
    fn parse(combo: &str) -> Result<Self> {
        let parts: Vec<&str> = combo.split('+').map(|s| s.trim()).collect();
        let (modifier_parts, key_part) = parts.split_at(parts.len().saturating_sub(1));
        let raw_key = *key_part.first().ok_or_else(|| {
            Error::Validation("empty key combo".to_string())
        })?;
        if raw_key.is_empty() {
            return Err(Error::Validation("empty key combo".to_string()));
        }

        let mut modifiers = 0;
        for part in modifier_parts {
            modifiers |= match part.to_ascii_lowercase().as_str() {
                "alt" | "option" => 1,
                "ctrl" | "control" => 2,
                "meta" | "cmd" | "command" => 4,
                "shift" => 8,
                other => {
                    return Err(Error::Validation(format!("Unknown modifier: {}", other)))
                }
            };
        }

        // With modifiers held no arm may produce text, or a combo like
        // Meta+Enter would inject a literal character.
        let (key, code, text) = match raw_key {
            "Enter" | "Return" => {
                let text = (modifiers == 0).then(|| "\r".to_string());
                ("Enter".to_string(), "Enter".to_string(), text)
            }
            "Tab" => ("Tab".to_string(), "Tab".to_string(), None),
            "Escape" | "Esc" => ("Escape".to_string(), "Escape".to_string(), None),
            "Backspace" => ("Backspace".to_string(), "Backspace".to_string(), None),
            "Delete" => ("Delete".to_string(), "Delete".to_string(), None),
            "PageDown" => ("PageDown".to_string(), "PageDown".to_string(), None),
            "PageUp" => ("PageUp".to_string(), "PageUp".to_string(), None),
            "Home" => ("Home".to_string(), "Home".to_string(), None),
            "End" => ("End".to_string(), "End".to_string(), None),
            "ArrowUp" | "Up" => ("ArrowUp".to_string(), "ArrowUp".to_string(), None),
            "ArrowDown" | "Down" => ("ArrowDown".to_string(), "ArrowDown".to_string(), None),
            "ArrowLeft" | "Left" => ("ArrowLeft".to_string(), "ArrowLeft".to_string(), None),
            "ArrowRight" | "Right" => ("ArrowRight".to_string(), "ArrowRight".to_string(), None),
            " " | "Space" => {
                let text = (modifiers == 0).then(|| " ".to_string());
                (" ".to_string(), "Space".to_string(), text)
            }
            k if k.chars().count() == 1 => {
                let ch = k.chars().next().unwrap();
                let code = if ch.is_ascii_alphabetic() {
                    format!("Key{}", ch.to_ascii_uppercase())
                } else if ch.is_ascii_digit() {
                    format!("Digit{}", ch)
                } else {
                    String::new()
                };
                let text = (modifiers == 0).then(|| k.to_string());
                (k.to_string(), code, text)
            }
            other => return Err(Error::Validation(format!("Unknown key: {}", other))),
        };

        Ok(Self {
            key,
            code,
            modifiers,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_key() {
        let stroke = KeyStroke::parse("Enter").unwrap();
        assert_eq!(stroke.key, "Enter");
        assert_eq!(stroke.modifiers, 0);
        assert_eq!(stroke.text.as_deref(), Some("\r"));
    }

    #[test]
    fn test_parse_combo() {
        let stroke = KeyStroke::parse("Meta+A").unwrap();
        assert_eq!(stroke.key, "A");
        assert_eq!(stroke.code, "KeyA");
        assert_eq!(stroke.modifiers, 4);
        assert!(stroke.text.is_none());
    }

    #[test]
    fn test_parse_modified_named_key_has_no_text() {
        let stroke = KeyStroke::parse("Meta+Enter").unwrap();
        assert_eq!(stroke.key, "Enter");
        assert_eq!(stroke.modifiers, 4);
        assert!(stroke.text.is_none());

        let stroke = KeyStroke::parse("Ctrl+Space").unwrap();
        assert!(stroke.text.is_none());
    }

    #[test]
    fn test_parse_multi_modifier() {
        let stroke = KeyStroke::parse("Ctrl+Shift+t").unwrap();
        assert_eq!(stroke.modifiers, 2 | 8);
        assert_eq!(stroke.code, "KeyT");
    }

    #[test]
    fn test_parse_page_down() {
        let stroke = KeyStroke::parse("PageDown").unwrap();
        assert_eq!(stroke.code, "PageDown");
        assert!(stroke.text.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(KeyStroke::parse("").is_err());
        assert!(KeyStroke::parse("NotAKey").is_err());
        assert!(KeyStroke::parse("Hyper+x").is_err());
    }
}
