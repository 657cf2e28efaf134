//! Navigation and input actions for the driven tab.

use async_trait::async_trait;
use serde_json::{json, Value};
use tabrelay_core::Result;
use tracing::info;

use crate::{require_f64, require_str, Action, ActionContext};

pub struct GotoAction;

#[async_trait]
impl Action for GotoAction {
    fn name(&self) -> &'static str {
        "goto"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_str(args, "url")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let url = require_str(&args, "url")?;
        info!(url = %url, "Navigating");
        ctx.browser()?.navigate(url).await?;
        Ok(json!({"url": url}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!(
            "navigate to {}",
            args.get("url").and_then(|v| v.as_str()).unwrap_or("?")
        )
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        format!(
            "navigated to {}",
            args.get("url").and_then(|v| v.as_str()).unwrap_or("?")
        )
    }
}

pub struct GoBackAction;

#[async_trait]
impl Action for GoBackAction {
    fn name(&self) -> &'static str {
        "go_back"
    }

    async fn execute(&self, ctx: ActionContext, _args: Value) -> Result<Value> {
        ctx.browser()?.evaluate("history.back()").await?;
        Ok(json!({}))
    }

    fn describe_outcome(&self, _args: &Value, _result: &Value) -> String {
        "went back one page".to_string()
    }
}

pub struct GoForwardAction;

#[async_trait]
impl Action for GoForwardAction {
    fn name(&self) -> &'static str {
        "go_forward"
    }

    async fn execute(&self, ctx: ActionContext, _args: Value) -> Result<Value> {
        ctx.browser()?.evaluate("history.forward()").await?;
        Ok(json!({}))
    }

    fn describe_outcome(&self, _args: &Value, _result: &Value) -> String {
        "went forward one page".to_string()
    }
}

pub struct ClickAction;

#[async_trait]
impl Action for ClickAction {
    fn name(&self) -> &'static str {
        "click"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_f64(args, "x")?;
        require_f64(args, "y")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let x = require_f64(&args, "x")?;
        let y = require_f64(&args, "y")?;
        info!(x, y, "Clicking");
        ctx.browser()?.click_at(x, y).await?;
        Ok(json!({"x": x, "y": y}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!("click at ({}, {})", args["x"], args["y"])
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        format!("clicked at ({}, {})", args["x"], args["y"])
    }
}

pub struct HoverAction;

#[async_trait]
impl Action for HoverAction {
    fn name(&self) -> &'static str {
        "hover"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_f64(args, "x")?;
        require_f64(args, "y")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let x = require_f64(&args, "x")?;
        let y = require_f64(&args, "y")?;
        ctx.browser()?.hover_at(x, y).await?;
        Ok(json!({"x": x, "y": y}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!("hover at ({}, {})", args["x"], args["y"])
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        format!("hovered at ({}, {})", args["x"], args["y"])
    }
}

pub struct TypeAction;

#[async_trait]
impl Action for TypeAction {
    fn name(&self) -> &'static str {
        "type"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_str(args, "text")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let text = require_str(&args, "text")?;
        info!(chars = text.chars().count(), "Typing text");
        ctx.browser()?.insert_text(text).await?;
        Ok(json!({"text": text}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!(
            "type \"{}\"",
            args.get("text").and_then(|v| v.as_str()).unwrap_or("")
        )
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        format!(
            "typed \"{}\"",
            args.get("text").and_then(|v| v.as_str()).unwrap_or("")
        )
    }
}

pub struct PressAction;

#[async_trait]
impl Action for PressAction {
    fn name(&self) -> &'static str {
        "press"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_str(args, "key")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let key = require_str(&args, "key")?;
        ctx.browser()?.press_key(key).await?;
        Ok(json!({"key": key}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!(
            "press {}",
            args.get("key").and_then(|v| v.as_str()).unwrap_or("?")
        )
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        format!(
            "pressed {}",
            args.get("key").and_then(|v| v.as_str()).unwrap_or("?")
        )
    }
}

pub struct ScrollAction;

#[async_trait]
impl Action for ScrollAction {
    fn name(&self) -> &'static str {
        "scroll"
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let dy = args.get("dy").and_then(|v| v.as_f64()).unwrap_or(400.0);
        let position = ctx
            .browser()?
            .evaluate(&format!("window.scrollBy(0, {}); window.scrollY", dy))
            .await?;
        Ok(json!({"dy": dy, "scroll_position": position}))
    }

    fn describe_request(&self, args: &Value) -> String {
        let dy = args.get("dy").and_then(|v| v.as_f64()).unwrap_or(400.0);
        format!("scroll by {} px", dy)
    }

    fn describe_outcome(&self, args: &Value, _result: &Value) -> String {
        let dy = args.get("dy").and_then(|v| v.as_f64()).unwrap_or(400.0);
        format!("scrolled by {} px", dy)
    }
}

pub struct EvaluateAction;

#[async_trait]
impl Action for EvaluateAction {
    fn name(&self) -> &'static str {
        "evaluate"
    }

    fn validate(&self, args: &Value) -> Result<()> {
        require_str(args, "expression")?;
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value> {
        let expression = require_str(&args, "expression")?;
        let result = ctx.browser()?.evaluate(expression).await?;
        Ok(json!({"result": result}))
    }

    fn describe_request(&self, args: &Value) -> String {
        format!(
            "evaluate script: {}",
            args.get("expression").and_then(|v| v.as_str()).unwrap_or("")
        )
    }

    fn describe_outcome(&self, _args: &Value, _result: &Value) -> String {
        "evaluated script".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabrelay_core::Config;

    fn detached_ctx() -> ActionContext {
        ActionContext::detached(Config::default())
    }

    #[test]
    fn test_validation() {
        assert!(GotoAction.validate(&json!({"url": "https://example.com"})).is_ok());
        assert!(GotoAction.validate(&json!({})).is_err());
        assert!(ClickAction.validate(&json!({"x": 10, "y": 20})).is_ok());
        assert!(ClickAction.validate(&json!({"x": 10})).is_err());
        assert!(TypeAction.validate(&json!({"text": "hello"})).is_ok());
        assert!(TypeAction.validate(&json!({})).is_err());
        assert!(PressAction.validate(&json!({"key": "Enter"})).is_ok());
        assert!(EvaluateAction.validate(&json!({"expression": "1+1"})).is_ok());
        assert!(EvaluateAction.validate(&json!({})).is_err());
    }

    #[test]
    fn test_describe_request() {
        assert_eq!(
            ClickAction.describe_request(&json!({"x": 120, "y": 480})),
            "click at (120, 480)"
        );
        assert_eq!(
            GotoAction.describe_request(&json!({"url": "https://example.com"})),
            "navigate to https://example.com"
        );
        assert_eq!(PressAction.describe_request(&json!({"key": "Enter"})), "press Enter");
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(
            ClickAction.describe_outcome(&json!({"x": 1, "y": 2}), &Value::Null),
            "clicked at (1, 2)"
        );
        assert_eq!(
            TypeAction.describe_outcome(&json!({"text": "hi"}), &Value::Null),
            "typed \"hi\""
        );
    }

    #[tokio::test]
    async fn test_execute_without_browser_fails_cleanly() {
        let err = ClickAction
            .execute(detached_ctx(), json!({"x": 1, "y": 2}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("browser not connected"));
    }
}
