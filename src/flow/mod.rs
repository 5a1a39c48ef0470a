pub mod dispatch;
pub mod manager;
pub mod session;
pub mod state;

use crate::flow::state::FlowState;
use crate::message::ConversationMessage;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Validated arguments handed to a function handler.
pub type FlowArgs = Map<String, Value>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("function `{name}` is not available on node `{node}`")]
    UnknownFunction { name: String, node: String },
    #[error("invalid arguments for `{name}`: {details}")]
    SchemaValidation { name: String, details: String },
    #[error("stale function call for activation {got}, current activation is {current}")]
    StaleTransition { got: u64, current: u64 },
    #[error("handler for `{name}` failed: {details}")]
    HandlerFault { name: String, details: String },
    #[error("session is terminated")]
    SessionTerminated,
    #[error("flow manager is already initialized")]
    AlreadyInitialized,
    #[error("flow manager is not initialized")]
    NotInitialized,
}

/// What a handler hands back to the flow manager: the structured result fed
/// into the conversation, and the next node to activate (`None` = stay).
#[derive(Debug)]
pub struct HandlerOutcome {
    pub result: Value,
    pub next: Option<NodeConfig>,
}

impl HandlerOutcome {
    pub fn transition(result: Value, next: NodeConfig) -> Self {
        Self { result, next: Some(next) }
    }

    pub fn stay(result: Value) -> Self {
        Self { result, next: None }
    }
}

/// A function callable by the language model while its node is current.
///
/// Handlers write collected data into the session's [`FlowState`] and compute
/// the next node; anything long-running belongs to the surrounding pipeline.
#[async_trait]
pub trait FunctionHandler: Send + Sync + Debug {
    async fn call(&self, args: FlowArgs, state: &FlowState) -> anyhow::Result<HandlerOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParameterKind {
    fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Integer => "integer",
            ParameterKind::Boolean => "boolean",
        }
    }
}

/// One typed property of a function's parameter schema.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    kind: ParameterKind,
    description: Option<String>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl ParameterSpec {
    pub fn string() -> Self {
        Self::of(ParameterKind::String)
    }

    pub fn number() -> Self {
        Self::of(ParameterKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(ParameterKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(ParameterKind::Boolean)
    }

    fn of(kind: ParameterKind) -> Self {
        Self { kind, description: None, minimum: None, maximum: None }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn with_maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    fn to_json(&self) -> Value {
        let mut spec = Map::new();
        spec.insert("type".to_string(), json!(self.kind.type_name()));
        if let Some(description) = &self.description {
            spec.insert("description".to_string(), json!(description));
        }
        if let Some(minimum) = self.minimum {
            spec.insert("minimum".to_string(), json!(minimum));
        }
        if let Some(maximum) = self.maximum {
            spec.insert("maximum".to_string(), json!(maximum));
        }
        Value::Object(spec)
    }
}

/// Typed parameter schema declared on a function, convertible to the JSON
/// Schema document the dispatcher validates against.
#[derive(Debug, Clone, Default)]
pub struct ParameterSchema {
    properties: BTreeMap<String, ParameterSpec>,
    required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: &str, spec: ParameterSpec) -> Self {
        self.properties.insert(name.to_string(), spec);
        self
    }

    pub fn required(mut self, name: &str) -> Self {
        self.required.push(name.to_string());
        self
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, spec)| (name.clone(), spec.to_json()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// The declaration half of a [`FunctionSchema`], as advertised to the
/// language-model service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A callable capability exposed to the language model.
#[derive(Debug, Clone)]
pub struct FunctionSchema {
    name: String,
    description: String,
    parameters: ParameterSchema,
    handler: Arc<dyn FunctionHandler>,
}

impl FunctionSchema {
    pub fn new(
        name: &str,
        description: &str,
        parameters: ParameterSchema,
        handler: Arc<dyn FunctionHandler>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    pub fn handler(&self) -> &Arc<dyn FunctionHandler> {
        &self.handler
    }

    pub fn decl(&self) -> FunctionDecl {
        FunctionDecl {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.to_json_schema(),
        }
    }
}

/// Side-effecting instruction executed after a node's messages have been
/// delivered; at most once per activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    EndConversation,
}

/// One conversational state: what the assistant is instructed to say, which
/// functions the model may invoke, and what happens after.
///
/// Transitions are returned by value from handlers, so a `NodeConfig` is a
/// plain record, not an entry in a static graph.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    name: String,
    role_messages: Vec<ConversationMessage>,
    task_messages: Vec<ConversationMessage>,
    functions: Vec<FunctionSchema>,
    respond_immediately: bool,
    post_actions: Vec<PostAction>,
}

impl NodeConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role_messages: Vec::new(),
            task_messages: Vec::new(),
            functions: Vec::new(),
            // The assistant speaks for a freshly activated node unless told
            // to wait for the user first.
            respond_immediately: true,
            post_actions: Vec::new(),
        }
    }

    pub fn with_role_message(mut self, content: &str) -> Self {
        self.role_messages.push(ConversationMessage::system(content));
        self
    }

    pub fn with_task_message(mut self, content: &str) -> Self {
        self.task_messages.push(ConversationMessage::user(content));
        self
    }

    pub fn with_function(mut self, function: FunctionSchema) -> Self {
        self.functions.push(function);
        self
    }

    pub fn respond_immediately(mut self, respond: bool) -> Self {
        self.respond_immediately = respond;
        self
    }

    pub fn with_post_action(mut self, action: PostAction) -> Self {
        self.post_actions.push(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role_messages(&self) -> &[ConversationMessage] {
        &self.role_messages
    }

    pub fn task_messages(&self) -> &[ConversationMessage] {
        &self.task_messages
    }

    pub fn functions(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSchema> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn responds_immediately(&self) -> bool {
        self.respond_immediately
    }

    pub fn post_actions(&self) -> &[PostAction] {
        &self.post_actions
    }

    pub fn function_decls(&self) -> Vec<FunctionDecl> {
        self.functions.iter().map(|f| f.decl()).collect()
    }
}
