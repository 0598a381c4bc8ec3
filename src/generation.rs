//! External generation capability.
//!
//! Defines the [`Generator`] trait the core prompts against and the concrete
//! [`GeminiGenerator`] speaking the `generateContent` REST shape. The service
//! is treated as unreliable and slow: every call carries a bounded timeout
//! chosen by the call site and is attempted exactly once — callers degrade to
//! their documented fallbacks instead of retrying.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }
}

/// One generation call: optional system instruction, ordered turns, sampling
/// temperature, output bound, and the call site's timeout.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

/// The external text-generation capability, as a black box.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, req: GenerationRequest) -> Result<String>;
}

/// Generator backed by the Gemini `generateContent` endpoint.
///
/// The API key is read from the configured environment variable at
/// construction time; a missing key does not prevent startup — calls fail
/// with [`Error::Upstream`] and the callers' fallbacks apply.
pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub fn from_config(config: &GenerationConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "generation API key not set, generation calls will fail"
            );
        }
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        }
    }
}

fn request_body(req: &GenerationRequest) -> Value {
    let contents: Vec<Value> = req
        .turns
        .iter()
        .map(|t| {
            serde_json::json!({
                "role": t.role.as_str(),
                "parts": [{ "text": t.text }],
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "temperature": req.temperature,
            "maxOutputTokens": req.max_output_tokens,
        },
    });
    if let Some(system) = &req.system {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }
    body
}

/// Extract the answer text from a `generateContent` response.
fn parse_response(json: &Value) -> Result<String> {
    json.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| Error::Parse("missing candidates[0].content.parts[0].text".to_string()))
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, req: GenerationRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Upstream("generation API key not configured".to_string()))?;

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request_body(&req))
            .timeout(req.timeout)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "generation API error {status}: {body}"
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        parse_response(&json)
    }
}
