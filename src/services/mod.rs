pub mod cartesia;
pub mod deepgram;
pub mod openrouter;

use crate::flow::FunctionDecl;
use crate::message::{ConversationMessage, ToolCall};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// Failures talking to an external speech or language-model service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to {service} failed: {details}")]
    Request { service: &'static str, details: String },
    #[error("{service} returned an unexpected response: {details}")]
    BadResponse { service: &'static str, details: String },
}

/// Everything the language model needs for one completion: the assembled
/// conversation plus the functions it may invoke.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ConversationMessage>,
    pub functions: Vec<FunctionDecl>,
}

/// What a completion produced: natural speech to synthesize, or a structured
/// function invocation for the dispatcher.
#[derive(Debug, Clone)]
pub enum LlmReply {
    Utterance(String),
    FunctionCall(ToolCall),
}

/// Synthesized audio ready for playout.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[async_trait]
pub trait LanguageModel: Send + Sync + Debug {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmReply, ServiceError>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync + Debug {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync + Debug {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, ServiceError>;
}
