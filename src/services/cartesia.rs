use crate::services::{AudioClip, ServiceError, TextToSpeech};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

/// British Reading Lady, the voice the interview ships with.
pub const DEFAULT_VOICE_ID: &str = "71a7ad14-091c-4e8e-a314-022ece01c121";
const DEFAULT_BASE_URL: &str = "https://api.cartesia.ai";
const API_VERSION: &str = "2024-06-10";
const MODEL_ID: &str = "sonic-2";
const SERVICE: &str = "cartesia";

/// Cartesia TTS bytes client; returns one WAV clip per utterance.
#[derive(Debug, Clone)]
pub struct CartesiaTts {
    client: Client,
    api_key: String,
    voice_id: String,
    base_url: Url,
}

impl CartesiaTts {
    pub fn new(api_key: &str, voice_id: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/tts/bytes", self.base_url.as_str().trim_end_matches('/'))
    }

    fn build_body(&self, text: &str) -> Value {
        json!({
            "model_id": MODEL_ID,
            "transcript": text,
            "voice": {"mode": "id", "id": self.voice_id},
            "output_format": {
                "container": "wav",
                "encoding": "pcm_s16le",
                "sample_rate": 24000,
            },
        })
    }
}

#[async_trait]
impl TextToSpeech for CartesiaTts {
    async fn synthesize(&self, text: &str) -> Result<AudioClip, ServiceError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", API_VERSION)
            .json(&self.build_body(text))
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

        let bytes = resp.bytes().await.map_err(|e| ServiceError::BadResponse {
            service: SERVICE,
            details: e.to_string(),
        })?;
        Ok(AudioClip {
            bytes: bytes.to_vec(),
            mime: "audio/wav".to_string(),
        })
    }
}
