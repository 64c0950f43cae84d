use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider} returned status {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("transport error talking to {provider}: {0}")]
    Transport { provider: String, source: reqwest::Error },

    #[error("no API key configured for {0}")]
    MissingApiKey(String),
}

impl LlmError {
    /// Whether this failure should trigger primary→fallback retry per §4.2
    /// step 8 (timeout, 429, 5xx, or malformed response).
    pub fn should_fall_back(&self) -> bool {
        match self {
            LlmError::Timeout { .. } => true,
            LlmError::Http { status, .. } => *status == 429 || *status >= 500,
            LlmError::MalformedResponse(_) => true,
            LlmError::Transport { .. } => true,
            LlmError::MissingApiKey(_) => true,
        }
    }
}
