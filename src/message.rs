use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured function invocation requested by the language model.
#[derive(Debug, Clone, PartialEq, JsonSchema, Serialize, Deserialize)]
pub struct ToolCall {
    id: String,
    name: String,
    arguments: Value,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }
}

/// One entry of the conversation context shared with the language model.
///
/// Role and task instructions are plain `system`/`user` entries; the tool
/// variants carry the function-call exchange so the model sees its own
/// invocations and their results on the next turn.
#[derive(Debug, Clone, PartialEq, JsonSchema, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    ToolRequest { call: ToolCall },
    ToolResponse { call_id: String, name: String, result: Value },
}

impl ConversationMessage {
    pub fn system(content: &str) -> Self {
        Self::System {
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::User {
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self::Assistant {
            content: content.to_string(),
        }
    }

    pub fn tool_request(call: ToolCall) -> Self {
        Self::ToolRequest { call }
    }

    pub fn tool_response(call_id: &str, name: &str, result: Value) -> Self {
        Self::ToolResponse {
            call_id: call_id.to_string(),
            name: name.to_string(),
            result,
        }
    }

    /// Spoken or instructional text, if this entry carries any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                Some(content)
            }
            _ => None,
        }
    }
}
