//! Google Gemini backend over the Generative Language REST API.
//!
//! Uses the non-streaming `generateContent` endpoint:
//! `POST {base_url}/v1beta/models/{model}:generateContent` with the API key in
//! the `x-goog-api-key` header. Images travel as base64 `inline_data` parts.

use crate::backend::{GenerateRequest, GenerateResponse, ModelBackend, Role, TokenUsage};
use crate::error::ModelError;
use async_trait::async_trait;
use parley_core::Result;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Configuration for the Gemini backend.
#[derive(Clone, Deserialize)]
pub struct GeminiConfig {
    /// API key for the Generative Language API.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for the API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Transport timeout for one request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Sampling temperature used when the request does not set one.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Output token cap used when the request does not set one.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl GeminiConfig {
    /// Creates a configuration with the given API key and default settings.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

/// Gemini implementation of [`ModelBackend`].
#[derive(Clone)]
pub struct GeminiBackend {
    config: GeminiConfig,
    api_key: String,
    client: reqwest::Client,
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    /// Creates a new backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client cannot
    /// be built.
    pub fn new(config: GeminiConfig) -> Result<Self, ModelError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::InvalidConfig {
                reason: "Gemini API key is not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::InvalidConfig {
                reason: e.to_string(),
            })?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    #[instrument(
        skip(self, request),
        fields(
            model = %self.config.model,
            turns = request.history.len(),
            images = request.attachment_count()
        )
    )]
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let body = encode_request(request, &self.config);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(ModelError::RateLimited { retry_after_secs }.into());
        }

        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ModelError::RequestFailed {
                status: Some(status.as_u16()),
                reason: error_message(&text),
            }
            .into());
        }

        let decoded = decode_response(&text, &self.config.model)?;
        debug!(
            input_tokens = decoded.usage.input_tokens,
            output_tokens = decoded.usage.output_tokens,
            "Gemini response received"
        );
        Ok(decoded)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

fn transport_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::RequestFailed {
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum WirePart<'a> {
    Text(&'a str),
    InlineData {
        mime_type: &'static str,
        data: String,
    },
}

#[derive(Debug, Serialize)]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

fn encode_request<'a>(request: &'a GenerateRequest, config: &GeminiConfig) -> WireRequest<'a> {
    let contents = request
        .history
        .iter()
        .map(|entry| {
            let mut parts = Vec::with_capacity(entry.attachments.len() + 1);
            if !entry.text.is_empty() {
                parts.push(WirePart::Text(&entry.text));
            }
            parts.extend(entry.attachments.iter().map(|a| WirePart::InlineData {
                mime_type: a.mime_type(),
                data: a.to_base64(),
            }));
            WireContent {
                role: Some(entry.role),
                parts,
            }
        })
        .collect();

    let system_instruction = request.system.as_deref().map(|system| WireContent {
        role: None,
        parts: vec![WirePart::Text(system)],
    });

    let temperature = request.temperature.or(config.temperature);
    let max_output_tokens = request.max_output_tokens.or(config.max_output_tokens);
    let generation_config = (temperature.is_some() || max_output_tokens.is_some()).then_some(
        WireGenerationConfig {
            temperature,
            max_output_tokens,
        },
    );

    WireRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    prompt_feedback: Option<WirePromptFeedback>,
    usage_metadata: Option<WireUsage>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct WireCandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn decode_response(body: &str, model: &str) -> std::result::Result<GenerateResponse, ModelError> {
    let response: WireResponse =
        serde_json::from_str(body).map_err(|e| ModelError::ResponseParseFailed {
            reason: e.to_string(),
        })?;

    let Some(candidate) = response.candidates.first() else {
        return Err(match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => ModelError::Blocked { reason },
            None => ModelError::EmptyResponse,
        });
    };

    let text: String = candidate
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.text.as_deref())
        .collect();

    if text.is_empty() {
        return Err(match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
                ModelError::Blocked {
                    reason: reason.to_string(),
                }
            }
            _ => ModelError::EmptyResponse,
        });
    }

    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(GenerateResponse {
        text,
        usage,
        model: response.model_version.unwrap_or_else(|| model.to_string()),
    })
}

/// Extracts `error.message` from a Gemini error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.chars().take(512).collect(),
    }
}
