//! Reflection worker (C12): nightly batch job (§4.9) — memory consolidation,
//! baseline drift, quirk evolution, and needs update. Every LLM-backed step
//! degrades gracefully on a parse or transport failure rather than aborting
//! the rest of the run; the batch-over-many-users driver follows the
//! scheduler's batching/pause contract (§4.9).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use companion_core::{GatewayError, UserId};
use companion_llm::{extract_json_output, LlmRouter};
use companion_memory::MemoryManager;
use companion_personality::{NeedType, PadState, PersonalityStore, QuirkCategory};
use companion_stores::{MemoryKind, RelationalStore};
use serde::Deserialize;
use tracing::warn;

use crate::interaction;

const CONSOLIDATION_WINDOW_HOURS: i64 = 24;
const MIN_CLUSTER_MEMBERS: usize = 3;
const MAX_CLUSTERS_APPLIED: usize = 5;
const VOLATILITY_WINDOW_HOURS: i64 = 24;
const CLUSTER_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Deserialize)]
struct MemoryCluster {
    theme: String,
    description: String,
    confidence: f32,
    indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    clusters: Vec<MemoryCluster>,
}

#[derive(Debug, Deserialize)]
struct ObservedQuirk {
    name: String,
    category: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct QuirkExtractionResponse {
    quirks: Vec<ObservedQuirk>,
}

#[derive(Clone)]
pub struct ReflectionWorker {
    personality: PersonalityStore,
    memory: MemoryManager,
    llm: LlmRouter,
    relational: RelationalStore,
    pad_drift_rate: f32,
    quirk_reinforcement_rate: f32,
}

impl ReflectionWorker {
    pub fn new(
        personality: PersonalityStore,
        memory: MemoryManager,
        llm: LlmRouter,
        relational: RelationalStore,
        pad_drift_rate: f32,
        quirk_reinforcement_rate: f32,
    ) -> Self {
        Self { personality, memory, llm, relational, pad_drift_rate, quirk_reinforcement_rate }
    }

    /// Runs all four steps for one user. Each step is independent; a
    /// failure in one is logged and does not block the others.
    pub async fn run_for_user(&self, user_id: &UserId) {
        if let Err(err) = self.consolidate_memories(user_id).await {
            warn!(%user_id, %err, "memory consolidation failed");
        }
        if let Err(err) = self.drift_baseline(user_id).await {
            warn!(%user_id, %err, "baseline drift failed");
        }
        if let Err(err) = self.evolve_quirks(user_id).await {
            warn!(%user_id, %err, "quirk evolution failed");
        }
        if let Err(err) = self.update_needs(user_id).await {
            warn!(%user_id, %err, "needs update failed");
        }
    }

    /// Runs `run_for_user` over `user_ids` in fixed-size batches with a
    /// pause between batches (§4.9: "bounded-size batches... with a small
    /// inter-batch pause").
    pub async fn run_batch(&self, user_ids: &[UserId], batch_size: usize, pause: Duration) {
        for chunk in user_ids.chunks(batch_size.max(1)) {
            for user_id in chunk {
                self.run_for_user(user_id).await;
            }
            tokio::time::sleep(pause).await;
        }
    }

    /// §4.9 step 1.
    async fn consolidate_memories(&self, user_id: &UserId) -> Result<(), GatewayError> {
        let since = Utc::now() - ChronoDuration::hours(CONSOLIDATION_WINDOW_HOURS);
        let candidates = self.memory.list_unconsolidated_since(user_id, MemoryKind::Episodic, since).await?;
        if candidates.len() < MIN_CLUSTER_MEMBERS {
            return Ok(());
        }

        let ids: Vec<String> = candidates.iter().map(|(id, _, _)| id.clone()).collect();
        let contents = self.memory.fetch_contents(user_id, MemoryKind::Episodic, &ids).await?;

        let numbered: Vec<(usize, &str)> =
            ids.iter().enumerate().filter_map(|(index, id)| contents.get(id).map(|content| (index, content.as_str()))).collect();
        if numbered.len() < MIN_CLUSTER_MEMBERS {
            return Ok(());
        }

        let prompt = clustering_prompt(&numbered);
        let raw = match self.llm.chat_with_fallback(&prompt, CLUSTER_TEMPERATURE).await {
            Ok((_role, text)) => text,
            Err(err) => {
                warn!(%user_id, %err, "memory clustering LLM call failed, skipping consolidation this run");
                return Ok(());
            }
        };

        let Some(response) = extract_json_output::<ClusterResponse>(&raw) else {
            warn!(%user_id, "memory clustering response unparsable, skipping consolidation this run");
            return Ok(());
        };

        let mut clusters: Vec<MemoryCluster> = response.clusters.into_iter().filter(|cluster| cluster.indices.len() >= MIN_CLUSTER_MEMBERS).collect();
        clusters.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        clusters.truncate(MAX_CLUSTERS_APPLIED);

        for cluster in clusters {
            let member_ids: Vec<String> = cluster.indices.iter().filter_map(|&index| ids.get(index).cloned()).collect();
            if member_ids.len() < MIN_CLUSTER_MEMBERS {
                continue;
            }
            let member_importance: Vec<f32> = member_ids
                .iter()
                .filter_map(|id| candidates.iter().find(|(candidate_id, _, _)| candidate_id == id).map(|(_, _, importance)| *importance))
                .collect();
            let mean_importance =
                if member_importance.is_empty() { 0.5 } else { member_importance.iter().sum::<f32>() / member_importance.len() as f32 };
            let consolidated_importance = (mean_importance * 1.2).min(1.0);

            let content = format!("{}: {}", cluster.theme, cluster.description);
            if let Err(err) = self.memory.store(user_id, &content, MemoryKind::Semantic, Some(consolidated_importance), HashMap::new()).await {
                warn!(%user_id, %err, "failed to store consolidated semantic memory, leaving sources unconsolidated");
                continue;
            }
            if let Err(err) = self.memory.mark_consolidated(user_id, &member_ids).await {
                warn!(%user_id, %err, "failed to mark sources consolidated");
            }
        }

        Ok(())
    }

    /// §4.9 step 2.
    async fn drift_baseline(&self, user_id: &UserId) -> Result<(), GatewayError> {
        let since = Utc::now() - ChronoDuration::hours(VOLATILITY_WINDOW_HOURS);
        let samples = interaction::recent_pad_samples(&self.relational, user_id, since).await?;
        self.personality.drift_baseline(user_id, &samples, self.pad_drift_rate).await?;
        Ok(())
    }

    /// §4.9 step 3. Decay applies uniformly to every active quirk;
    /// reinforcement depends on what the day's conversations actually
    /// exhibited, which the primary LLM extracts from the same
    /// consolidation-window memories used in step 1.
    async fn evolve_quirks(&self, user_id: &UserId) -> Result<(), GatewayError> {
        self.personality.decay_quirks(user_id, VOLATILITY_WINDOW_HOURS as f32).await?;

        let since = Utc::now() - ChronoDuration::hours(CONSOLIDATION_WINDOW_HOURS);
        let recent = self.memory.list_unconsolidated_since(user_id, MemoryKind::Episodic, since).await.unwrap_or_default();
        if recent.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = recent.iter().map(|(id, _, _)| id.clone()).collect();
        let contents = self.memory.fetch_contents(user_id, MemoryKind::Episodic, &ids).await.unwrap_or_default();
        if contents.is_empty() {
            return Ok(());
        }

        let prompt = quirk_extraction_prompt(contents.values());
        let Ok((_role, raw)) = self.llm.chat_with_fallback(&prompt, CLUSTER_TEMPERATURE).await else {
            return Ok(());
        };
        let Some(response) = extract_json_output::<QuirkExtractionResponse>(&raw) else {
            return Ok(());
        };

        for observed in response.quirks {
            let category = QuirkCategory::parse(&observed.category).unwrap_or(QuirkCategory::Behavior);
            if let Err(err) =
                self.personality.reinforce_quirk(user_id, &observed.name, category, &observed.description, self.quirk_reinforcement_rate).await
            {
                warn!(%user_id, %err, quirk = %observed.name, "failed to reinforce observed quirk");
            }
        }

        Ok(())
    }

    /// §4.9 step 4: nudges need levels from emotional volatility and
    /// interaction volume rather than a fixed clock — high volatility or a
    /// quiet day both push needs toward urgency; a busy, stable day
    /// satisfies them.
    async fn update_needs(&self, user_id: &UserId) -> Result<(), GatewayError> {
        let since = Utc::now() - ChronoDuration::hours(VOLATILITY_WINDOW_HOURS);
        let samples = interaction::recent_pad_samples(&self.relational, user_id, since).await?;
        let interaction_count = interaction::interaction_count_since(&self.relational, user_id, since).await?;

        let volatility = pad_volatility(&samples);
        let volume_factor = (interaction_count as f32 / 10.0).clamp(0.0, 1.0);
        let delta = (volatility * 0.2) - (volume_factor * 0.1);

        for need_type in NeedType::ALL {
            self.personality.update_need(user_id, need_type, delta).await?;
        }
        Ok(())
    }
}

fn pad_volatility(samples: &[PadState]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().map(|s| s.pleasure).sum::<f32>() / samples.len() as f32;
    let variance = samples.iter().map(|s| (s.pleasure - mean).powi(2)).sum::<f32>() / samples.len() as f32;
    variance.sqrt().clamp(0.0, 1.0)
}

fn clustering_prompt(numbered: &[(usize, &str)]) -> String {
    let memory_list = numbered.iter().map(|(index, content)| format!("{index}: {content}")).collect::<Vec<_>>().join("\n");
    format!(
        "You are a memory analyst for an AI companion. Below are recent memories, each numbered. \
         Identify thematic clusters of at least 3 memories that share a clear theme.\n\
         Respond only with JSON: {{\"clusters\":[{{\"theme\":\"...\",\"description\":\"...\",\"confidence\":0.0-1.0,\"indices\":[0,2,5]}}]}}\n\
         If there are no clear clusters, return {{\"clusters\":[]}}.\n\n\
         MEMORIES:\n{memory_list}"
    )
}

fn quirk_extraction_prompt<'a>(contents: impl Iterator<Item = &'a String>) -> String {
    let joined = contents.take(30).cloned().collect::<Vec<_>>().join("\n- ");
    format!(
        "You are observing an AI companion's recent conversational memories for recurring \
         behavioral quirks (speech patterns, habits, or preferences the companion itself exhibited).\n\
         Respond only with JSON: {{\"quirks\":[{{\"name\":\"short_slug\",\"category\":\"speech_pattern\"|\"behavior\"|\"preference\",\"description\":\"...\"}}]}}\n\
         If nothing recurs clearly, return {{\"quirks\":[]}}.\n\n\
         MEMORIES:\n- {joined}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatility_is_zero_with_fewer_than_two_samples() {
        assert_eq!(pad_volatility(&[]), 0.0);
        assert_eq!(pad_volatility(&[PadState::new(0.5, 0.5, 0.5)]), 0.0);
    }

    #[test]
    fn volatility_rises_with_spread() {
        let stable = vec![PadState::new(0.5, 0.0, 0.0), PadState::new(0.5, 0.0, 0.0)];
        let volatile = vec![PadState::new(-0.9, 0.0, 0.0), PadState::new(0.9, 0.0, 0.0)];
        assert!(pad_volatility(&volatile) > pad_volatility(&stable));
    }
}
