//! Engine Configuration
//!
//! Loaded once from the environment at startup. Only the completion-service
//! credentials, the model choice, the script-catalog location, and the log
//! level live here; all pacing constants are fixed in `pacing`.

use crate::completion::OpenAICompatibleClient;
use async_openai::config::OpenAIConfig;
use std::path::PathBuf;
use tracing::Level;

/// Failures while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Engine configuration resolved once at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub chat_model: String,
    pub scripts_path: PathBuf,
    pub log_level: Level,
}

impl EngineConfig {
    /// Reads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Tests set their own variables; a .env file must not bleed in.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_base_url = std::env::var("OPENAI_BASE_URL").ok();

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let scripts_path = std::env::var("SCRIPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./scripts"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            openai_base_url,
            chat_model,
            scripts_path,
            log_level,
        })
    }

    /// Builds the default completion client from this configuration.
    pub fn completion_client(&self) -> OpenAICompatibleClient {
        let mut config = OpenAIConfig::new().with_api_key(&self.openai_api_key);
        if let Some(base_url) = &self.openai_base_url {
            config = config.with_api_base(base_url);
        }
        OpenAICompatibleClient::new(config, self.chat_model.clone())
    }
}
