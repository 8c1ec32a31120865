//! Text and vision generation service clients.
//!
//! Defines the [`GenerationService`] trait and concrete implementations:
//! - **[`DisabledGenerator`]**: always fails; used when no provider is configured.
//! - **[`OpenAiChatGenerator`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint (Groq by default), with image input as a data URL.
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/generate`.
//! - **[`GeminiGenerator`]**: Google's `generateContent` API with inline image data.
//! - **[`MockGenerator`]**: scripted responses for tests.
//!
//! Clients make exactly one HTTP request per call. There is no retry at
//! this layer: callers turn every [`ServiceError`] into fallback content.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::{GenerationConfig, VisionConfig};
use crate::error::ServiceError;

const GROQ_URL: &str = "https://api.groq.com/openai/v1";
const OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Image attached to a vision request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    /// Wrap raw image bytes, sniffing the MIME type from the content.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime_type = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "image/png".to_string());
        Self { bytes, mime_type }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// A single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub image: Option<ImageInput>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            image: None,
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A remote text (or text + image) generation service.
///
/// Implementations hold no per-call mutable state, so one handle can serve
/// concurrent requests.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Model identifier, for logs and diagnostics.
    fn model_name(&self) -> &str;

    /// Generate text for `request`. The returned text is trimmed and non-empty.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}

/// Shared handle injected into the summarizer and the query engine.
pub type SharedGenerator = Arc<dyn GenerationService>;

fn non_empty(text: &str) -> Result<String, ServiceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Malformed("empty completion".to_string()));
    }
    Ok(trimmed.to_string())
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn api_key(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", env_name),
    }
}

/// Send a prepared request and decode a JSON body, mapping every failure
/// onto [`ServiceError`].
async fn send_json(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<Value, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::from_reqwest(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::from_status(status, body));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ServiceError::Malformed(e.to_string()))
}

// ============ Disabled ============

/// Used when `provider = "disabled"`. Every call fails, which routes
/// summaries and answers through their fallback paths.
pub struct DisabledGenerator;

#[async_trait]
impl GenerationService for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ServiceError> {
        Err(ServiceError::Disabled)
    }
}

// ============ OpenAI-compatible ============

/// Chat-completions client for OpenAI-compatible APIs (Groq, OpenAI, vLLM).
pub struct OpenAiChatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiChatGenerator {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key_env: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.unwrap_or(GROQ_URL).trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key(api_key_env)?,
            timeout,
        })
    }

    fn body(&self, request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        let user_content = match &request.image {
            Some(image) => json!([
                { "type": "text", "text": request.prompt },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.mime_type, image.base64())
                    }
                }
            ]),
            None => json!(request.prompt),
        };
        messages.push(json!({ "role": "user", "content": user_content }));

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

fn parse_chat_response(json: &Value) -> Result<String, ServiceError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ServiceError::Malformed("missing choices[0].message.content".into()))?;
    non_empty(content)
}

#[async_trait]
impl GenerationService for OpenAiChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(request));
        let json = send_json(http, self.timeout).await?;
        parse_chat_response(&json)
    }
}

// ============ Ollama ============

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Client for a local Ollama instance (`POST /api/generate`).
///
/// Multimodal models (e.g. `llava`) accept the image as base64 in `images`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(base_url: Option<&str>, model: &str, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or(OLLAMA_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl GenerationService for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            images: request.image.iter().map(|i| i.base64()).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let http = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body);
        let json = send_json(http, self.timeout).await?;
        let parsed: OllamaGenerateResponse =
            serde_json::from_value(json).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        non_empty(&parsed.response)
    }
}

// ============ Gemini ============

/// Client for Google's Gemini `generateContent` endpoint.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiGenerator {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key_env: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url
                .unwrap_or(GEMINI_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key(api_key_env)?,
            timeout,
        })
    }

    fn body(request: &GenerationRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(image) = &request.image {
            parts.push(json!({
                "inline_data": { "mime_type": image.mime_type, "data": image.base64() }
            }));
        }
        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

fn parse_gemini_response(json: &Value) -> Result<String, ServiceError> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            ServiceError::Malformed("missing candidates[0].content.parts".to_string())
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    non_empty(&text)
}

#[async_trait]
impl GenerationService for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let http = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(request));
        let json = send_json(http, self.timeout).await?;
        parse_gemini_response(&json)
    }
}

// ============ Factories ============

/// Create the text generation client described by `[generation]`.
///
/// # Errors
///
/// Returns an error for unknown providers or a missing API key.
pub fn create_text_generator(config: &GenerationConfig) -> Result<SharedGenerator> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiChatGenerator::new(
            config.url.as_deref(),
            &config.model,
            &config.api_key_env,
            config.timeout_secs,
        )?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(
            config.url.as_deref(),
            &config.model,
            config.timeout_secs,
        )?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Create the vision generation client described by `[vision]`.
pub fn create_vision_generator(config: &VisionConfig) -> Result<SharedGenerator> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(
            config.url.as_deref(),
            &config.model,
            &config.api_key_env,
            config.timeout_secs,
        )?)),
        "openai" => Ok(Arc::new(OpenAiChatGenerator::new(
            config.url.as_deref(),
            &config.model,
            &config.api_key_env,
            config.timeout_secs,
        )?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(
            config.url.as_deref(),
            &config.model,
            config.timeout_secs,
        )?)),
        other => bail!("Unknown vision provider: {}", other),
    }
}

// ============ Mock ============

type Responder = dyn Fn(&GenerationRequest) -> Result<String, ServiceError> + Send + Sync;

/// Scripted generator for tests. Records every request it receives.
pub struct MockGenerator {
    responder: Box<Responder>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_| Ok(text.clone()))
    }

    /// Always fail with a connection error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_fn(move |_| Err(ServiceError::Connection(message.clone())))
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl GenerationService for MockGenerator {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.responder)(request)
    }
}
