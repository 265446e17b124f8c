//! LLM backend trait, provider adapters and backend construction.
//!
//! Backends:
//!   GeminiBackend           — Google Gemini generateContent API
//!   OpenAiCompatibleBackend — any OpenAI-compatible chat/completions endpoint
//!
//! Constructing a backend only wires up an HTTP client; no request is sent
//! until `generate` is called.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Backend returned no content")]
    EmptyResponse,
    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },
}

// ── Request ───────────────────────────────────────────────────────────────────

/// Inline binary attachment, already base64-encoded by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub images: Vec<InlineData>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Default::default() }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.images.push(InlineData { mime_type: mime_type.into(), data: data.into() });
        self
    }
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<String, LlmError>;
    fn model_id(&self) -> &str;
}

/// Builds one backend handle per chain identifier. Must not perform I/O.
pub trait BackendFactory: Send + Sync {
    fn build(&self, identifier: &str, credential: &SecretString) -> Arc<dyn LlmBackend>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAiCompatible,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini           => "gemini",
            ProviderKind::OpenAiCompatible => "openai_compatible",
        }
    }
}

/// Factory for the real HTTP providers. All backends share one connection pool.
#[derive(Clone)]
pub struct ProviderFactory {
    kind: ProviderKind,
    base_url: Option<String>,
    client: reqwest::Client,
}

impl ProviderFactory {
    pub fn new(kind: ProviderKind, base_url: Option<String>) -> Self {
        Self { kind, base_url, client: reqwest::Client::new() }
    }
}

impl BackendFactory for ProviderFactory {
    fn build(&self, identifier: &str, credential: &SecretString) -> Arc<dyn LlmBackend> {
        match self.kind {
            ProviderKind::Gemini => {
                let mut b = GeminiBackend::with_client(self.client.clone(), copy_secret(credential), identifier);
                if let Some(url) = &self.base_url {
                    b = b.with_base_url(url.clone());
                }
                Arc::new(b)
            }
            ProviderKind::OpenAiCompatible => {
                let url = self.base_url.clone()
                    .unwrap_or_else(|| "http://localhost:1234".to_string());
                let key = (!credential.expose_secret().is_empty())
                    .then(|| copy_secret(credential));
                Arc::new(OpenAiCompatibleBackend::with_client(self.client.clone(), url, identifier, key))
            }
        }
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

// ── Helper: status + error body ──────────────────────────────────────────────

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if status >= 400 {
        // Overloaded gateways often answer with HTML; keep the raw body then.
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| {
                body["error"]["message"]
                    .as_str()
                    .or_else(|| body["message"].as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| text.chars().take(512).collect());
        return Err(LlmError::Api { status, message });
    }
    Ok(serde_json::from_str(&text)?)
}

// ── 1. Google Gemini ──────────────────────────────────────────────────────────

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    pub model: String,
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, model)
    }

    pub fn with_client(client: reqwest::Client, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            client,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn request_body(req: &GenerateRequest) -> serde_json::Value {
        let mut parts = vec![serde_json::json!({ "text": req.prompt })];
        parts.extend(req.images.iter().map(|img| serde_json::json!({
            "inlineData": { "mimeType": img.mime_type, "data": img.data }
        })));

        let mut body = serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "maxOutputTokens": req.max_tokens.unwrap_or(8192),
                "temperature":     req.temperature.unwrap_or(0.4),
            }
        });
        if let Some(sys) = &req.system {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": sys }] });
        }
        body
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn generate(&self, req: GenerateRequest) -> Result<String, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let resp = self.client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&Self::request_body(&req))
            .send()
            .await?;
        let json = check_response_status(resp).await?;

        let text: String = json["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn model_id(&self) -> &str { &self.model }
}

// ── 2. OpenAI-Compatible (LMStudio, vLLM, OpenRouter, …) ─────────────────────

pub struct OpenAiCompatibleBackend {
    pub base_url: String,
    pub model: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self { base_url: base_url.into(), model: model.into(), api_key, client }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => req.bearer_auth(k.expose_secret()),
            None    => req,
        }
    }

    fn request_body(&self, req: &GenerateRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(sys) = &req.system {
            messages.push(serde_json::json!({ "role": "system", "content": sys }));
        }
        if req.images.is_empty() {
            messages.push(serde_json::json!({ "role": "user", "content": req.prompt }));
        } else {
            let mut content = vec![serde_json::json!({ "type": "text", "text": req.prompt })];
            content.extend(req.images.iter().map(|img| serde_json::json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{};base64,{}", img.mime_type, img.data) }
            })));
            messages.push(serde_json::json!({ "role": "user", "content": content }));
        }
        serde_json::json!({
            "model":       self.model,
            "messages":    messages,
            "max_tokens":  req.max_tokens.unwrap_or(4096),
            "temperature": req.temperature.unwrap_or(0.4),
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn generate(&self, req: GenerateRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(&req);
        let resp = self.auth(self.client.post(&url)).json(&body).send().await?;
        let json = check_response_status(resp).await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_id(&self) -> &str { &self.model }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SecretString {
        SecretString::from("AIza-test".to_string())
    }

    #[test]
    fn test_factory_builds_gemini_per_identifier() {
        let f = ProviderFactory::new(ProviderKind::Gemini, None);
        let b = f.build("gemini-2.5-flash", &key());
        assert_eq!(b.model_id(), "gemini-2.5-flash");
    }

    #[test]
    fn test_factory_builds_openai_compatible_without_key() {
        let f = ProviderFactory::new(ProviderKind::OpenAiCompatible, Some("http://localhost:8000".into()));
        let b = f.build("local-model", &SecretString::from(String::new()));
        assert_eq!(b.model_id(), "local-model");
    }

    #[test]
    fn test_gemini_body_includes_system_and_images() {
        let req = GenerateRequest::new("describe")
            .with_system("you are terse")
            .with_image("image/png", "aGVsbG8=");
        let body = GeminiBackend::request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "you are terse");
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn test_openai_body_uses_data_url_for_images() {
        let b = OpenAiCompatibleBackend::new("http://localhost:1234", "m", None);
        let req = GenerateRequest::new("describe").with_image("image/jpeg", "abc");
        let body = b.request_body(&req);
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,abc"
        );
    }

    #[test]
    fn test_provider_kind_deserializes_snake_case() {
        let k: ProviderKind = serde_json::from_str("\"openai_compatible\"").unwrap();
        assert_eq!(k, ProviderKind::OpenAiCompatible);
        assert_eq!(k.as_str(), "openai_compatible");
    }
}
