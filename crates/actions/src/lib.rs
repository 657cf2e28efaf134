pub mod cdp;
pub mod page;
pub mod registry;
pub mod state;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tabrelay_core::{Config, Result};

pub use registry::ActionRegistry;

/// Shared context handed to every action invocation.
///
/// `browser` is absent when the relay runs without a DevTools connection
/// (e.g. in tests, or when only non-browser actions are registered).
#[derive(Clone)]
pub struct ActionContext {
    pub browser: Option<Arc<cdp::CdpClient>>,
    pub config: Config,
}

impl ActionContext {
    pub fn detached(config: Config) -> Self {
        Self {
            browser: None,
            config,
        }
    }

    pub fn browser(&self) -> Result<&Arc<cdp::CdpClient>> {
        self.browser
            .as_ref()
            .ok_or_else(|| tabrelay_core::Error::Action("browser not connected".to_string()))
    }
}

/// A named handler in the relay's action table.
///
/// Implementations must not panic out of `execute`; the relay wraps every
/// invocation and converts errors into an `{ok:false}` response for the
/// originating command.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, _args: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext, args: Value) -> Result<Value>;

    /// One line shown to a human approving this action, e.g. "click at (120, 480)".
    fn describe_request(&self, args: &Value) -> String {
        format!("{} {}", self.name(), args)
    }

    /// One line describing what the action did, published to observers.
    fn describe_outcome(&self, _args: &Value, _result: &Value) -> String {
        format!("{} completed", self.name())
    }
}

pub(crate) fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| tabrelay_core::Error::Validation(format!("'{}' is required", field)))
}

pub(crate) fn require_f64(args: &Value, field: &str) -> Result<f64> {
    args.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            tabrelay_core::Error::Validation(format!("'{}' must be a number", field))
        })
}
