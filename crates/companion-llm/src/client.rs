use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// A single OpenAI-compatible-HTTP provider (Chutes, Groq, OpenRouter-style
/// fallback, etc): bearer-auth plus a `/chat/completions` JSON call against
/// a configured base URL.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmClientConfig,
    label: &'static str,
}

impl LlmClient {
    pub fn new(label: &'static str, config: LlmClientConfig) -> Self {
        Self { http: reqwest::Client::new(), config, label }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Single free-text prompt completion (used by the appraisal/proactive
    /// prompt-assembly call sites that build one large formatted string).
    pub async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        self.chat(&[ChatMessage::user(prompt)], temperature).await
    }

    pub async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<String, LlmError> {
        if self.config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey(self.label.to_string()));
        }

        let payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": temperature,
        });

        let send = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .timeout(self.config.timeout)
            .send();

        let response = match tokio::time::timeout(self.config.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(LlmError::Transport { provider: self.label.to_string(), source });
            }
            Err(_) => {
                return Err(LlmError::Timeout {
                    provider: self.label.to_string(),
                    timeout_secs: self.config.timeout.as_secs(),
                });
            }
        };

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| LlmError::MalformedResponse(err.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Http {
                provider: self.label.to_string(),
                status: status.as_u16(),
                body: body.to_string(),
            });
        }

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".to_string()))
    }
}
