use crate::services::{cartesia, openrouter};
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),
}

/// Credentials and tunables for the three external services. All three keys
/// are required; startup fails before any session exists if one is absent.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub deepgram_api_key: String,
    pub cartesia_api_key: String,
    pub openrouter_api_key: String,
    pub llm_model: String,
    pub tts_voice_id: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingVar(key))
        };

        Ok(Self {
            deepgram_api_key: required("DEEPGRAM_API_KEY")?,
            cartesia_api_key: required("CARTESIA_API_KEY")?,
            openrouter_api_key: required("OPENROUTER_API_KEY")?,
            llm_model: lookup("OPENROUTER_MODEL")
                .unwrap_or_else(|| openrouter::DEFAULT_MODEL.to_string()),
            tts_voice_id: lookup("CARTESIA_VOICE_ID")
                .unwrap_or_else(|| cartesia::DEFAULT_VOICE_ID.to_string()),
        })
    }
}

/// Loads variables from an env file when it exists; the process environment
/// always wins.
pub fn load_dotenv(env_file: &Path) {
    if env_file.exists() {
        dotenvy::from_path(env_file).ok();
        info!("Loaded .env from {}", env_file.display());
    } else {
        warn!(
            "no env file at {}, relying on process environment",
            env_file.display()
        );
    }
}
