use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::{ProviderError, Result};
use crate::config::ProviderConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";
const GENERATE_CONTENT_METHOD: &str = "generateContent";
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
    pub supported_generation_methods: Vec<String>,
}

/// A text-completion backend addressed by model name.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn has_credentials(&self) -> bool;

    async fn generate_text(&self, model: &str, prompt: &str) -> Result<String>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(ProviderError::Unsupported)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<RawModel>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct UpstreamErrorBody {
    error: UpstreamError,
}

#[derive(Deserialize, Debug)]
struct UpstreamError {
    message: String,
}

/// HTTP client for a Gemini-style `generateContent` API.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            temperature: config.temperature,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredentials)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    #[tracing::instrument(skip(self, prompt), fields(provider.model = %model, prompt.length = prompt.len()))]
    async fn generate_text(&self, model: &str, prompt: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let url = format!("{}/models/{}:{}", self.base_url, model, GENERATE_CONTENT_METHOD);
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json",
            },
        };

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::warn!(http.status = status.as_u16(), "Provider rejected generateContent");
            return Err(ProviderError::Status {
                model: model.to_string(),
                status: status.as_u16(),
                message: upstream_error_message(&text),
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        let output: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        if output.trim().is_empty() {
            return Err(ProviderError::EmptyResponse(model.to_string()));
        }
        tracing::debug!(response.length = output.len(), "Provider returned text");
        Ok(output)
    }

    #[tracing::instrument(skip(self))]
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let api_key = self.api_key()?;
        let url = format!("{}/models", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                model: "models".to_string(),
                status: status.as_u16(),
                message: upstream_error_message(&text),
            });
        }

        let parsed: ListModelsResponse = serde_json::from_str(&text)?;
        Ok(parsed
            .models
            .into_iter()
            .filter(|model| {
                model
                    .supported_generation_methods
                    .iter()
                    .any(|method| method == GENERATE_CONTENT_METHOD)
            })
            .map(|model| {
                let name = model
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&model.name)
                    .to_string();
                ModelInfo {
                    display_name: model.display_name.unwrap_or_else(|| name.clone()),
                    name,
                    supported_generation_methods: model.supported_generation_methods,
                }
            })
            .collect())
    }
}

fn upstream_error_message(body: &str) -> String {
    let message = serde_json::from_str::<UpstreamErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    if message.is_empty() {
        return "no error details".to_string();
    }
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
