//! Read-only state queries: screenshot, URL, viewport.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tabrelay_core::{Error, Result};
use tracing::debug;

use crate::{Action, ActionContext};

pub struct ScreenshotAction;

#[async_trait]
impl Action for ScreenshotAction {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    async fn execute(&self, ctx: ActionContext, _args: Value) -> Result<Value> {
        let data = ctx.browser()?.screenshot().await?;
        // Decode once to verify the payload and report its size.
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&data)
            .map_err(|e| Error::Action(format!("Invalid screenshot payload: {}", e)))?;
        debug!(bytes = bytes.len(), "Screenshot captured");
        Ok(json!({
            "dataUrl": format!("data:image/png;base64,{}", data),
            "bytes": bytes.len(),
        }))
    }

    fn describe_request(&self, _args: &Value) -> String {
        "take a screenshot".to_string()
    }

    fn describe_outcome(&self, _args: &Value, result: &Value) -> String {
        format!(
            "captured screenshot ({} bytes)",
            result.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0)
        )
    }
}

pub struct CurrentUrlAction;

#[async_trait]
impl Action for CurrentUrlAction {
    fn name(&self) -> &'static str {
        "current_url"
    }

    async fn execute(&self, ctx: ActionContext, _args: Value) -> Result<Value> {
        ctx.browser()?
            .evaluate("({url: window.location.href, title: document.title})")
            .await
    }

    fn describe_outcome(&self, _args: &Value, result: &Value) -> String {
        format!(
            "current url is {}",
            result.get("url").and_then(|v| v.as_str()).unwrap_or("?")
        )
    }
}

pub struct ViewportAction;

#[async_trait]
impl Action for ViewportAction {
    fn name(&self) -> &'static str {
        "get_viewport"
    }

    async fn execute(&self, ctx: ActionContext, _args: Value) -> Result<Value> {
        ctx.browser()?.viewport().await
    }

    fn describe_outcome(&self, _args: &Value, result: &Value) -> String {
        format!(
            "viewport is {}x{}",
            result.get("width").and_then(|v| v.as_u64()).unwrap_or(0),
            result.get("height").and_then(|v| v.as_u64()).unwrap_or(0)
        )
    }
}
