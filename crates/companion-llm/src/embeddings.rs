use std::time::Duration;

use serde_json::json;

use crate::error::LlmError;

/// Embedding client (half of C2). Talks to the Gemini-shaped embeddings
/// endpoint; request/response shape is simplified to the single
/// `{"embedding": {"values": [...]}}` body Gemini's `embedContent` returns.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    pub dim: usize,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dim: usize, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            dim,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey("embeddings".to_string()));
        }

        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key,
        );
        let payload = json!({
            "content": { "parts": [{ "text": text }] }
        });

        let send = self.http.post(url).json(&payload).timeout(self.timeout).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(LlmError::Transport { provider: "embeddings".to_string(), source }),
            Err(_) => {
                return Err(LlmError::Timeout { provider: "embeddings".to_string(), timeout_secs: self.timeout.as_secs() });
            }
        };

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| LlmError::MalformedResponse(err.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Http { provider: "embeddings".to_string(), status: status.as_u16(), body: body.to_string() });
        }

        let values = body
            .get("embedding")
            .and_then(|embedding| embedding.get("values"))
            .and_then(|values| values.as_array())
            .ok_or_else(|| LlmError::MalformedResponse("missing embedding.values".to_string()))?;

        Ok(values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
    }
}
