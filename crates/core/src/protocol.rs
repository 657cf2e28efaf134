use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision kind that forces a command through the permission gate.
pub const REQUIRE_CONFIRMATION: &str = "require_confirmation";

/// An inbound instruction from the controller: `{id, cmd, args}`.
///
/// `id` is generated by the sender and unique per in-flight command;
/// `args` defaults to an empty object when absent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub id: String,
    pub cmd: String,
    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Command {
    pub fn new(id: &str, cmd: &str, args: Value) -> Self {
        Self {
            id: id.to_string(),
            cmd: cmd.to_string(),
            args,
        }
    }

    /// Extract `args.safety_decision` if the controller attached one.
    pub fn safety_decision(&self) -> Option<SafetyDecision> {
        self.args
            .get("safety_decision")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// The single outcome message correlated to a Command by id:
/// `{id, ok, result?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn success(id: &str, result: Value) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Safety annotation the controller can attach to a command's arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyDecision {
    pub decision: String,
    #[serde(default)]
    pub explanation: String,
}

impl SafetyDecision {
    pub fn requires_confirmation(&self) -> bool {
        self.decision == REQUIRE_CONFIRMATION
    }
}

/// A raw inbound frame classified by shape.
///
/// Frames carrying a `cmd` field are commands for the dispatch loop. Any
/// other frame is handed back with its `id` (if present) so the channel can
/// match it against its pending outbound requests; frames that match nothing
/// are forwarded to observers unmodified.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Command(Command),
    Other { id: Option<String>, payload: Value },
}

impl InboundFrame {
    pub fn classify(payload: Value) -> Self {
        let is_command = payload
            .get("cmd")
            .map(|v| v.is_string())
            .unwrap_or(false);
        if is_command {
            // The shape already guarantees `cmd` is a string, so this only
            // falls through on a non-object frame like `"cmd"`-keyed arrays.
            if let Ok(command) = serde_json::from_value::<Command>(payload.clone()) {
                return InboundFrame::Command(command);
            }
        }
        let id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        InboundFrame::Other { id, payload }
    }
}
