//! Embedding + LLM clients (C2): request/response over external AI
//! endpoints, with timeout, retry-with-backoff, and primary→fallback model
//! selection across three OpenAI-compatible-HTTP provider roles (primary
//! chat, fallback chat, fast scoring/security) plus a separate embeddings
//! endpoint.

mod client;
mod embeddings;
mod error;
mod router;

pub use client::{ChatMessage, ChatRole, LlmClient, LlmClientConfig};
pub use embeddings::EmbeddingClient;
pub use error::LlmError;
pub use router::{LlmRouter, ProviderRole};

/// Parse a JSON object out of a (possibly prose-wrapped) LLM response.
///
/// Looks for the first `{` and last `}` and attempts to deserialize the
/// slice between them, so models that wrap JSON in prose or markdown
/// fences still parse.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        action: Option<String>,
    }

    #[test]
    fn extract_json_output_skips_prose_wrapper() {
        let raw = "Sure, here you go:\n```json\n{\"action\": \"reminder\"}\n```\nLet me know!";
        let parsed: Sample = extract_json_output(raw).unwrap();
        assert_eq!(parsed.action.as_deref(), Some("reminder"));
    }

    #[test]
    fn extract_json_output_none_when_no_braces() {
        let parsed: Option<Sample> = extract_json_output("no json here");
        assert!(parsed.is_none());
    }
}
