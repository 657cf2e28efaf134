use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tabrelay_core::{Error, Result};
use tracing::{debug, warn};

use crate::page::{
    ClickAction, EvaluateAction, GoBackAction, GoForwardAction, GotoAction, HoverAction,
    PressAction, ScrollAction, TypeAction,
};
use crate::state::{CurrentUrlAction, ScreenshotAction, ViewportAction};
use crate::{Action, ActionContext};

/// The relay's action table: command name to handler.
///
/// Populated once at startup and treated as immutable afterwards; the
/// dispatch loop holds it behind an `Arc`.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry with the built-in browser action set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        // Navigation
        registry.register(Arc::new(GotoAction));
        registry.register(Arc::new(GoBackAction));
        registry.register(Arc::new(GoForwardAction));

        // Input
        registry.register(Arc::new(ClickAction));
        registry.register(Arc::new(HoverAction));
        registry.register(Arc::new(TypeAction));
        registry.register(Arc::new(PressAction));

        // Page
        registry.register(Arc::new(ScrollAction));
        registry.register(Arc::new(EvaluateAction));

        // State
        registry.register(Arc::new(ScreenshotAction));
        registry.register(Arc::new(CurrentUrlAction));
        registry.register(Arc::new(ViewportAction));

        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        debug!(name = action.name(), "Registering action");
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// One line shown to a human approving a command against this table.
    pub fn describe_request(&self, name: &str, args: &Value) -> String {
        match self.get(name) {
            Some(action) => action.describe_request(args),
            None => format!("{} {}", name, args),
        }
    }

    /// Look up and run an action, wrapping validation and execution failures.
    pub async fn execute(&self, name: &str, ctx: ActionContext, args: Value) -> Result<Value> {
        let action = self
            .get(name)
            .ok_or_else(|| Error::Action(format!("unknown cmd: {}", name)))?;

        if let Err(e) = action.validate(&args) {
            warn!(action = name, error = %e, "Action validation failed");
            return Err(e);
        }

        debug!(action = name, "Executing action");
        action.execute(ctx, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tabrelay_core::Config;

    struct EchoAction;

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _ctx: ActionContext, args: Value) -> Result<Value> {
            Ok(args.get("v").cloned().unwrap_or(Value::Null))
        }
    }

    fn test_ctx() -> ActionContext {
        ActionContext::detached(Config::default())
    }

    #[test]
    fn test_registry_new_empty() {
        let registry = ActionRegistry::new();
        assert!(registry.action_names().is_empty());
        assert!(registry.get("click").is_none());
    }

    #[test]
    fn test_registry_with_builtins() {
        let registry = ActionRegistry::with_builtins();
        let names = registry.action_names();
        for expected in [
            "goto",
            "go_back",
            "go_forward",
            "click",
            "hover",
            "type",
            "press",
            "scroll",
            "evaluate",
            "screenshot",
            "current_url",
            "get_viewport",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_execute_unknown_action() {
        let registry = ActionRegistry::new();
        let err = registry
            .execute("bogus", test_ctx(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Action error: unknown cmd: bogus");
    }

    #[tokio::test]
    async fn test_execute_custom_action() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(EchoAction));
        let result = registry
            .execute("echo", test_ctx(), json!({"v": 5}))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_execute_validation_failure() {
        let registry = ActionRegistry::with_builtins();
        // click requires numeric coordinates
        let err = registry
            .execute("click", test_ctx(), json!({"x": "ten"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be a number"));
    }

    #[test]
    fn test_describe_request_falls_back_for_unknown() {
        let registry = ActionRegistry::new();
        let line = registry.describe_request("bogus", &json!({"a": 1}));
        assert!(line.starts_with("bogus"));
    }
}
