use crate::message::{ConversationMessage, ToolCall};
use crate::services::{CompletionRequest, LanguageModel, LlmReply, ServiceError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::error;
use url::Url;

pub const DEFAULT_MODEL: &str = "x-ai/grok-4-fast:free";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const SERVICE: &str = "openrouter";

/// Chat-completions client for OpenRouter's OpenAI-compatible API, with the
/// current node's functions declared as tools.
#[derive(Debug, Clone)]
pub struct OpenRouterLlm {
    client: Client,
    api_key: String,
    model: String,
    base_url: Url,
}

impl OpenRouterLlm {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(to_wire).collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }
}

fn to_wire(message: &ConversationMessage) -> Value {
    match message {
        ConversationMessage::System { content } => json!({"role": "system", "content": content}),
        ConversationMessage::User { content } => json!({"role": "user", "content": content}),
        ConversationMessage::Assistant { content } => {
            json!({"role": "assistant", "content": content})
        }
        ConversationMessage::ToolRequest { call } => json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": [{
                "id": call.id(),
                "type": "function",
                "function": {
                    "name": call.name(),
                    "arguments": call.arguments().to_string(),
                }
            }]
        }),
        ConversationMessage::ToolResponse { call_id, name, result } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "name": name,
            "content": result.to_string(),
        }),
    }
}

fn parse_reply(body: &Value) -> Result<LlmReply, ServiceError> {
    let message = body.pointer("/choices/0/message").ok_or_else(|| {
        ServiceError::BadResponse {
            service: SERVICE,
            details: "response missing choices[0].message".to_string(),
        }
    })?;

    if let Some(call) = message.pointer("/tool_calls/0") {
        let id = call.pointer("/id").and_then(Value::as_str).unwrap_or("call_0");
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadResponse {
                service: SERVICE,
                details: "tool call missing function name".to_string(),
            })?;
        let raw_args = call
            .pointer("/function/arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        let arguments: Value =
            serde_json::from_str(raw_args).map_err(|e| ServiceError::BadResponse {
                service: SERVICE,
                details: format!("tool call arguments are not valid JSON: {e}"),
            })?;
        return Ok(LlmReply::FunctionCall(ToolCall::new(id, name, arguments)));
    }

    match message.pointer("/content").and_then(Value::as_str) {
        Some(content) => Ok(LlmReply::Utterance(content.to_string())),
        None => Err(ServiceError::BadResponse {
            service: SERVICE,
            details: "message carries neither content nor tool calls".to_string(),
        }),
    }
}

#[async_trait]
impl LanguageModel for OpenRouterLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmReply, ServiceError> {
        let body = self.build_body(&request);
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Request {
                service: SERVICE,
                details: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            error!("OpenRouter error ({status}): {text}");
            return Err(ServiceError::BadResponse {
                service: SERVICE,
                details: format!("status {status}: {text}"),
            });
        }

        let json: Value = resp.json().await.map_err(|e| ServiceError::BadResponse {
            service: SERVICE,
            details: format!("invalid response body: {e}"),
        })?;
        parse_reply(&json)
    }
}
