use std::time::Duration;

use tracing::warn;

use crate::client::LlmClient;
use crate::error::LlmError;

/// Which provider role actually served a request — surfaced on
/// `InteractionRecord.fallback_used` (primary vs. fallback) and used to pick
/// the scoring client for C3/C5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Primary,
    Fallback,
    Scoring,
}

/// Routes chat completions across the primary/fallback/scoring provider
/// roles (C2). Retries each provider with bounded backoff before escalating
/// to the next role, per §2's "timeout,
/// retry-with-backoff, and primary→fallback model selection".
#[derive(Debug, Clone)]
pub struct LlmRouter {
    primary: LlmClient,
    fallback: LlmClient,
    scoring: LlmClient,
}

const RETRY_BACKOFFS: &[Duration] = &[Duration::from_millis(250), Duration::from_millis(750)];

impl LlmRouter {
    pub fn new(primary: LlmClient, fallback: LlmClient, scoring: LlmClient) -> Self {
        Self { primary, fallback, scoring }
    }

    pub fn scoring_client(&self) -> &LlmClient {
        &self.scoring
    }

    /// §4.2 step 8: try primary; on failure retry on fallback with the same
    /// prompt. Each provider gets bounded backoff retries for transient
    /// failures (timeout / 429 / 5xx / transport) before the next provider
    /// is tried. Both failing is the caller's signal to use the canned
    /// degraded response and set `fallback_used=true`.
    pub async fn chat_with_fallback(&self, prompt: &str, temperature: f32) -> Result<(ProviderRole, String), LlmError> {
        match Self::complete_with_retry(&self.primary, prompt, temperature).await {
            Ok(text) => Ok((ProviderRole::Primary, text)),
            Err(err) => {
                warn!(provider = self.primary.label(), error = %err, "primary LLM failed, falling back");
                let text = Self::complete_with_retry(&self.fallback, prompt, temperature).await?;
                Ok((ProviderRole::Fallback, text))
            }
        }
    }

    /// Fast-path completion for scoring/security classification (§4.5, §4.7)
    /// — no fallback chain, caller handles a failure by degrading locally
    /// (default importance, fail-secure threat classification).
    pub async fn score(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        self.scoring.complete(prompt, temperature).await
    }

    async fn complete_with_retry(client: &LlmClient, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        let mut last_err = None;
        for (attempt, backoff) in std::iter::once(&Duration::ZERO).chain(RETRY_BACKOFFS).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(*backoff).await;
            }
            match client.complete(prompt, temperature).await {
                Ok(text) => return Ok(text),
                Err(err) if err.should_fall_back() => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.expect("loop always runs at least once"))
    }
}
