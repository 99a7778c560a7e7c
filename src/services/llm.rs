use crate::core::error::{classify, ProviderError};
use crate::utils::image::InlineImage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_KEY_ENV: &str = "API_KEY";
const FALLBACK_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // only "gemini" for now
    /// Name of the environment variable holding the credential. Read on
    /// every request, never persisted.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_text_model() -> String {
    "gemini-3-flash-preview".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_retry_delay() -> u64 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            retry_count: 0,
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

/// The hosted generative backend. Every call is independent; implementations
/// must not share mutable state between concurrent calls.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Text generation constrained to `schema`. Returns the raw JSON text.
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String>;

    /// Free-form text, optionally grounded on an image.
    async fn generate_text(&self, prompt: &str, image: Option<&InlineImage>) -> Result<String>;

    /// Generates an image from `prompt`, or edits `source` following it.
    async fn generate_image(
        &self,
        prompt: &str,
        source: Option<&InlineImage>,
    ) -> Result<InlineImage>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    base_url: Url,
    text_model: String,
    image_model: String,
    api_key_env: String,
    retry_count: usize,
    retry_delay: Duration,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid Gemini base_url: {}", config.base_url))?;

        Ok(Self {
            base_url,
            text_model: config.text_model.trim().to_string(),
            image_model: config.image_model.trim().to_string(),
            api_key_env: config.api_key_env.clone(),
            retry_count: config.retry_count,
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            client: reqwest::Client::new(),
        })
    }

    fn api_key(&self) -> Result<String> {
        let mut names = vec![self.api_key_env.as_str()];
        if self.api_key_env == DEFAULT_API_KEY_ENV {
            names.push(FALLBACK_API_KEY_ENV);
        }

        names
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderError::configuration(format!(
                    "API key not found in environment variable {}",
                    self.api_key_env
                ))
                .into()
            })
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{}:generateContent", model))
            .context("Failed to build Gemini endpoint")
    }

    async fn send(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let api_key = self.api_key()?;
        let url = self.endpoint(model)?;

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &api_key, request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = classify(&err).is_some_and(ProviderError::is_retryable);
                    if !retryable || attempt >= self.retry_count {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        "Gemini request failed (attempt {}/{}), retrying: {:#}",
                        attempt,
                        self.retry_count + 1,
                        err
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        api_key: &str,
        request: &GeminiRequest,
    ) -> Result<GeminiResponse> {
        debug!("POST {}", url);
        let mut keyed_url = url.clone();
        keyed_url.query_pairs_mut().append_pair("key", api_key);

        let resp = self
            .client
            .post(keyed_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::transport(format!("Gemini request failed: {}", e.without_url()))
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| {
                ProviderError::transport(format!(
                    "Read Gemini response failed: {}",
                    e.without_url()
                ))
            })?;

        if !status.is_success() {
            let err = match status.as_u16() {
                401 | 403 => ProviderError::configuration(format!(
                    "Gemini rejected the API key ({}): {}",
                    status, body
                )),
                429 | 500..=599 => {
                    ProviderError::transport(format!("Gemini API error ({}): {}", status, body))
                }
                _ => ProviderError::invalid_response(format!(
                    "Gemini API error ({}): {}",
                    status, body
                )),
            };
            return Err(err.into());
        }

        parse_response(&body)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String> {
        let request = GeminiRequest::user(
            vec![GeminiPart::text(prompt)],
            Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(schema.clone()),
                response_modalities: None,
            }),
        );
        let response = self.send(&self.text_model, &request).await?;
        collect_text(&response)
    }

    async fn generate_text(&self, prompt: &str, image: Option<&InlineImage>) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(image) = image {
            parts.push(GeminiPart::image(image));
        }
        parts.push(GeminiPart::text(prompt));

        let response = self
            .send(&self.text_model, &GeminiRequest::user(parts, None))
            .await?;
        collect_text(&response)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        source: Option<&InlineImage>,
    ) -> Result<InlineImage> {
        let mut parts = Vec::new();
        if let Some(source) = source {
            parts.push(GeminiPart::image(source));
        }
        parts.push(GeminiPart::text(prompt));

        let request = GeminiRequest::user(
            parts,
            Some(GenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["IMAGE".to_string()]),
            }),
        );
        let response = self.send(&self.image_model, &request).await?;
        first_image(&response)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
    fn user(parts: Vec<GeminiPart>, generation_config: Option<GenerationConfig>) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config,
        }
    }
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn image(image: &InlineImage) -> Self {
        Self {
            inline_data: Some(GeminiInlineData {
                mime_type: image.mime_type.clone(),
                data: image.to_base64(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn parse_response(body: &str) -> Result<GeminiResponse> {
    let result: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(format!(
            "Failed to parse Gemini response: {}. Body: {}",
            e, body
        ))
    })?;

    if let Some(err) = &result.error {
        return Err(ProviderError::invalid_response(format!(
            "Gemini API returned error: {}",
            err.message
        ))
        .into());
    }
    Ok(result)
}

fn finish_reason(response: &GeminiResponse) -> &str {
    response
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.finish_reason.as_deref())
        .unwrap_or("UNKNOWN")
}

fn candidate_parts(response: &GeminiResponse) -> impl Iterator<Item = &GeminiPart> {
    response
        .candidates
        .iter()
        .flatten()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|content| content.parts.iter())
}

fn collect_text(response: &GeminiResponse) -> Result<String> {
    let text: String = candidate_parts(response)
        .filter_map(|part| part.text.as_deref())
        .collect();

    if text.trim().is_empty() {
        return Err(ProviderError::invalid_response(format!(
            "Gemini response empty. Finish reason: {}",
            finish_reason(response)
        ))
        .into());
    }
    Ok(text)
}

fn first_image(response: &GeminiResponse) -> Result<InlineImage> {
    let inline = candidate_parts(response)
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.is_empty())
        .ok_or_else(|| {
            ProviderError::invalid_response(format!(
                "No image data found in response. Finish reason: {}",
                finish_reason(response)
            ))
        })?;

    InlineImage::from_base64(&inline.mime_type, &inline.data)
        .map_err(|e| ProviderError::invalid_response(format!("{:#}", e)).into())
}
