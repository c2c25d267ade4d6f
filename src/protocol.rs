//! Wire protocol spoken with the assistant server
//!
//! Request/response bodies for `/chat` and `/qa-feedback`, the agent action
//! shape, and the frame markers used on the streamed response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request paths on the assistant server
pub mod paths {
    pub const CHAT: &str = "/chat";
    pub const CHAT_STREAM_QUERY: &str = "stream=true";
    pub const QA_FEEDBACK: &str = "/qa-feedback";
}

/// Frame markers on the streamed chat response
pub mod markers {
    /// Prefix of delta and structured frames.
    pub const DATA: &str = "data:";
    /// Prefix of the legacy action-batch frame.
    pub const AGENT_ACTIONS: &str = "agent_actions:";
    /// Payload that ends the answer text of a turn.
    pub const END_SENTINEL: &str = "[END] ";
    /// Content type advertised by a streaming response.
    pub const EVENT_STREAM: &str = "text/event-stream";
}

/// Body of `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            context: String::new(),
            session_id,
        }
    }
}

/// Kind of an agent directive. Anything the client does not know is kept as
/// `Other` so the batch still deserializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Search,
    #[serde(other)]
    Other,
}

/// A directive issued by the server alongside an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl AgentAction {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Read a parameter as a non-empty string. Numbers are stringified.
    pub fn param(&self, key: &str) -> Option<String> {
        let value = match self.params.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// Parse an action list leniently: entries that do not have the action shape
/// are skipped instead of failing the whole batch.
pub fn parse_actions(value: &Value) -> Option<Vec<AgentAction>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
    )
}

/// Body of a non-streaming `/chat` response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackResponse {
    pub response: Option<String>,
    pub actions: Vec<AgentAction>,
    pub session_id: Option<String>,
}

impl FallbackResponse {
    /// Build from an arbitrary JSON body. Unknown fields are ignored and a
    /// malformed `actions` entry is dropped.
    pub fn from_json(json: &Value) -> Self {
        let string_field = |key: &str| {
            json.get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        Self {
            response: string_field("response"),
            actions: json
                .get("actions")
                .and_then(parse_actions)
                .unwrap_or_default(),
            session_id: string_field("session_id").filter(|s| !s.is_empty()),
        }
    }
}

/// Verdict a user can give on an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Confirm,
    Wrong,
    Correct,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackKind::Confirm => write!(f, "confirm"),
            FeedbackKind::Wrong => write!(f, "wrong"),
            FeedbackKind::Correct => write!(f, "correct"),
        }
    }
}

/// Body of `POST /qa-feedback`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub question: String,
    pub answer: String,
    pub feedback_type: FeedbackKind,
}

/// Outcome of a feedback submission that reached the server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackReply {
    /// Whether the server answered with a 2xx status
    pub accepted: bool,
    /// Replacement answer generated for a `wrong` verdict
    pub new_answer: Option<String>,
}

impl FeedbackReply {
    pub fn from_json(accepted: bool, json: &Value) -> Self {
        Self {
            accepted,
            new_answer: json
                .get("new_answer")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}
