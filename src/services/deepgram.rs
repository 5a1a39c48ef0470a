use crate::services::{ServiceError, SpeechToText};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.deepgram.com";
const MODEL: &str = "nova-2";
const SERVICE: &str = "deepgram";

/// Deepgram prerecorded-transcription client for finalized audio segments.
#[derive(Debug, Clone)]
pub struct DeepgramStt {
    client: Client,
    api_key: String,
    base_url: Url,
}

impl DeepgramStt {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/listen?model={MODEL}&smart_format=true",
            self.base_url.as_str().trim_end_matches('/')
        )
    }
}

fn parse_transcript(body: &Value) -> Result<String, ServiceError> {
    body.pointer("/results/channels/0/alternatives/0/transcript")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| ServiceError::BadResponse {
            service: SERVICE,
            details: "response missing transcript".to_string(),
        })
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ServiceError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| ServiceError::Request {
                service: SERVICE,
                details: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(ServiceError::BadResponse {
                service: SERVICE,
                details: format!("status {status}: {text}"),
            });
        }

        let json: Value = resp.json().await.map_err(|e| ServiceError::BadResponse {
            service: SERVICE,
            details: format!("invalid response body: {e}"),
        })?;
        parse_transcript(&json)
    }
}
