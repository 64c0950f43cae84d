//! Importance scorer (C3): a short, low-temperature LLM completion scored
//! 0-10 with a 1-hour cache, falling back to a keyword heuristic whenever
//! the call fails or the response can't be parsed.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use companion_llm::LlmClient;
use companion_stores::KvCache;

const SCORING_TEMPERATURE: f32 = 0.1;

static SCORE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Scores memory content for importance (§4.5 write step 2 / C3).
#[derive(Clone)]
pub struct ImportanceScorer {
    llm: LlmClient,
    cache: Arc<KvCache>,
    cache_ttl: Duration,
}

impl ImportanceScorer {
    pub fn new(llm: LlmClient, cache: Arc<KvCache>, cache_ttl: Duration) -> Self {
        Self { llm, cache, cache_ttl }
    }

    /// Scores `content`, consulting and populating the cache. Never fails:
    /// any LLM transport error degrades straight to the heuristic without
    /// caching the result, since only a real score is worth remembering. A
    /// successful-but-unparsable response still caches the heuristic
    /// fallback.
    pub async fn score(&self, content: &str, context: Option<&Value>) -> f32 {
        let key = cache_key(content, context);

        if let Some(cached) = self.cache.get_string(&key).await {
            if let Ok(score) = cached.parse::<f32>() {
                return score;
            }
        }

        let prompt = build_prompt(content, context);
        let score = match self.llm.complete(&prompt, SCORING_TEMPERATURE).await {
            Ok(text) => {
                let score = match extract_score(&text) {
                    Some(score) => score,
                    None => {
                        warn!(response = %text, "importance score response unparsable, using heuristic");
                        heuristic_importance_score(content)
                    }
                };
                self.cache.set_string_ex(&key, &score.to_string(), self.cache_ttl).await;
                score
            }
            Err(err) => {
                warn!(%err, "importance scoring call failed, using heuristic");
                heuristic_importance_score(content)
            }
        };

        score
    }
}

fn cache_key(content: &str, context: Option<&Value>) -> String {
    let context_str = context.map(Value::to_string).unwrap_or_else(|| "{}".to_string());
    format!("importance:{}:{}", sha256_hex(content), sha256_hex(&context_str))
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extract_score(text: &str) -> Option<f32> {
    let raw = SCORE_PATTERN.find(text.trim())?.as_str().parse::<f32>().ok()?;
    Some(raw.clamp(0.0, 1.0))
}

fn build_prompt(content: &str, context: Option<&Value>) -> String {
    let context_str = context.map(Value::to_string).unwrap_or_else(|| "No additional context".to_string());
    format!(
        "You are an AI that scores the importance of conversation memories on a scale from 0.0 to 1.0.\n\n\
         SCORING CRITERIA (with weights):\n\
         - Emotional Significance (30%): Personal revelations, strong emotions, meaningful events\n\
         - Future Relevance (25%): Information likely to be referenced again\n\
         - Uniqueness (25%): Rare or distinctive information about the user\n\
         - Personal Disclosure (20%): User sharing personal details, preferences, relationships\n\n\
         EXAMPLES:\n\n\
         Input: \"I just got a new puppy named Max!\"\n\
         Output: 0.75\n\n\
         Input: \"What's the weather like?\"\n\
         Output: 0.1\n\n\
         Input: \"My dad passed away last month, I'm still grieving\"\n\
         Output: 0.95\n\n\
         Input: \"I prefer tea over coffee\"\n\
         Output: 0.4\n\n\
         Input: \"I just got promoted to senior engineer at Google!\"\n\
         Output: 0.9\n\n\
         Now score this memory:\n\n\
         User Message: \"{content}\"\n\
         Context: {context_str}\n\n\
         Output only a single number between 0.0 and 1.0:"
    )
}

/// Literal duplicates in `EMOTIONAL_WORDS` ("brilliant", "awful", "amazing",
/// "incredible" each appear twice) are intentional: scoring adds 0.1 per
/// list entry that matches, so these words are meant to count double.
const EMOTIONAL_WORDS: &[&str] = &[
    "love",
    "hate",
    "happy",
    "sad",
    "angry",
    "excited",
    "depressed",
    "anxious",
    "scared",
    "proud",
    "ashamed",
    "guilty",
    "grateful",
    "blessed",
    "amazing",
    "incredible",
    "terrible",
    "awful",
    "wonderful",
    "fantastic",
    "brilliant",
    "brilliant",
    "awful",
    "perfect",
    "horrible",
    "amazing",
    "incredible",
];

const LIFE_EVENTS: &[&str] = &[
    "married",
    "engaged",
    "divorced",
    "graduated",
    "promoted",
    "fired",
    "quit",
    "died",
    "passed away",
    "born",
    "pregnant",
    "baby",
    "child",
    "moved",
    "relocated",
    "job",
    "career",
    "degree",
    "school",
    "university",
];

/// Lowercased to match against already-lowercased content.
const PERSONAL_INDICATORS: &[&str] = &[
    "i feel",
    "i think",
    "i believe",
    "my opinion",
    "in my experience",
    "personally",
    "to me",
    "for me",
    "my family",
    "my friends",
    "my life",
    "i want",
    "i need",
    "i like",
    "i dislike",
    "i prefer",
];

const PERSONAL_QUESTION_WORDS: &[&str] = &["you", "your", "what", "why", "how"];

/// Keyword-weighted heuristic used whenever the LLM call fails or its
/// response can't be parsed. Ported from `_heuristic_importance_score`.
pub fn heuristic_importance_score(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let mut score = 0.0f32;

    for word in EMOTIONAL_WORDS {
        if lower.contains(word) {
            score += 0.1;
        }
    }
    for event in LIFE_EVENTS {
        if lower.contains(event) {
            score += 0.15;
        }
    }
    for indicator in PERSONAL_INDICATORS {
        if lower.contains(indicator) {
            score += 0.05;
        }
    }

    let word_count = content.split_whitespace().count();
    if word_count > 10 {
        score += (word_count as f32 * 0.01).min(0.2);
    }

    if content.split_whitespace().any(|word| word.len() > 3 && is_all_caps_word(word)) {
        score += 0.1;
    }

    if content.contains('?') && PERSONAL_QUESTION_WORDS.iter().any(|word| lower.contains(word)) {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// `str.isupper()`: true when the word has at least one cased character and
/// every cased character is uppercase.
fn is_all_caps_word(word: &str) -> bool {
    let mut has_cased = false;
    for ch in word.chars() {
        if ch.is_alphabetic() {
            has_cased = true;
            if !ch.is_uppercase() {
                return false;
            }
        }
    }
    has_cased
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotional_duplicates_double_count() {
        // "brilliant" and "awful" each appear twice in EMOTIONAL_WORDS.
        let score = heuristic_importance_score("brilliant");
        assert!((score - 0.2).abs() < 1e-5);
    }

    #[test]
    fn life_event_adds_larger_weight() {
        let score = heuristic_importance_score("I got married last week");
        assert!(score >= 0.15);
    }

    #[test]
    fn personal_indicator_now_matches_lowercased_content() {
        let score = heuristic_importance_score("I feel great about this");
        assert!(score > 0.0);
    }

    #[test]
    fn long_message_gets_length_bonus_capped_at_point_two() {
        let long = "word ".repeat(50);
        let score = heuristic_importance_score(&long);
        assert!(score <= 1.0);
        assert!(score > 0.0);
    }

    #[test]
    fn all_caps_word_adds_bonus() {
        let with_caps = heuristic_importance_score("THIS is important");
        let without_caps = heuristic_importance_score("this is important");
        assert!(with_caps > without_caps);
    }

    #[test]
    fn personal_question_adds_bonus() {
        let score = heuristic_importance_score("what do you think?");
        assert!(score >= 0.05);
    }

    #[test]
    fn neutral_short_message_scores_zero() {
        assert_eq!(heuristic_importance_score("ok"), 0.0);
    }

    #[test]
    fn score_extraction_clamps_and_ignores_prose() {
        assert_eq!(extract_score("Sure, I'd rate this 0.85 in importance."), Some(0.85));
        assert_eq!(extract_score("way too important: 7"), Some(1.0));
        assert_eq!(extract_score("no number here"), None);
    }

    #[test]
    fn cache_key_is_stable_for_same_inputs() {
        let a = cache_key("hello", None);
        let b = cache_key("hello", None);
        assert_eq!(a, b);
        let c = cache_key("hello", Some(&serde_json::json!({"k": "v"})));
        assert_ne!(a, c);
    }
}
