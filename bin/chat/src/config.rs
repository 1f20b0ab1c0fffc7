//! Centralized front end configuration.
//!
//! Loaded via the `config` crate from `PARLEY_`-prefixed environment
//! variables, with `__` separating nested keys, e.g.
//! `PARLEY_GEMINI__MODEL=gemini-1.5-pro` or
//! `PARLEY_CONVERSATION__RESPONSE_TIMEOUT_SECS=30`.
//! `GEMINI_API_KEY` is used when `PARLEY_GEMINI__API_KEY` is not set.

use parley_ai::GeminiConfig;
use parley_conversation::OrchestratorConfig;
use serde::Deserialize;

/// Front end configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    /// Gemini backend configuration.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Conversation configuration.
    #[serde(default)]
    pub conversation: OrchestratorConfig,

    /// Maximum number of images attached to one message.
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,
}

fn default_max_attachments() -> usize {
    3
}

impl ChatConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut config = Self::from_environment(environment())?;
        if config.gemini.api_key.is_none() {
            config.gemini.api_key = std::env::var("GEMINI_API_KEY").ok();
        }
        Ok(config)
    }

    fn from_environment(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("PARLEY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
