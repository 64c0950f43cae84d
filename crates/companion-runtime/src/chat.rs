//! Chat pipeline (C10): the eleven-step per-turn state machine (§4.2),
//! serialized per user by C9. Assembles the prompt from the user's
//! personality snapshot, retrieved memories, and the incoming message
//! before calling out to the LLM router.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use companion_core::{GatewayError, ThreatType, UserId};
use companion_llm::LlmRouter;
use companion_llm::ProviderRole;
use companion_memory::MemoryManager;
use companion_personality::{AppraisalEngine, PadState, PersonalityStore};
use companion_security::InjectionDetector;
use companion_stores::{MemoryKind, RelationalStore, UserProfileStore};
use tracing::{info, instrument, warn};

use crate::interaction::{self, InteractionRecord};
use crate::serializer::UserSerializer;

const MMR_K: usize = 5;
const MMR_LAMBDA: f32 = 0.7;
const CHAT_TEMPERATURE: f32 = 0.7;
const DEGRADED_RESPONSE: &str =
    "I'm having trouble reaching my usual thinking process right now, but I'm still here with you. Could we try that again in a moment?";

pub struct ChatInput {
    pub user_id: UserId,
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub agent_response: String,
    pub processing_ms: i64,
    pub emotional_delta: Option<PadState>,
    pub memories_retrieved: usize,
    pub threat_type: Option<ThreatType>,
}

pub struct ChatPipeline {
    serializer: UserSerializer,
    profiles: UserProfileStore,
    detector: InjectionDetector,
    personality: PersonalityStore,
    appraisal: AppraisalEngine,
    memory: MemoryManager,
    llm: LlmRouter,
    relational: RelationalStore,
}

impl ChatPipeline {
    pub fn new(
        serializer: UserSerializer,
        profiles: UserProfileStore,
        detector: InjectionDetector,
        personality: PersonalityStore,
        appraisal: AppraisalEngine,
        memory: MemoryManager,
        llm: LlmRouter,
        relational: RelationalStore,
    ) -> Self {
        Self { serializer, profiles, detector, personality, appraisal, memory, llm, relational }
    }

    #[instrument(skip(self, input), fields(user = %input.user_id, message_len = input.message.len()))]
    pub async fn process_turn(&self, input: ChatInput) -> Result<ChatOutput, GatewayError> {
        let started = Instant::now();

        // Step 1: admit. The handle is released on every exit path via Drop.
        let _handle = self.serializer.admit(&input.user_id)?;

        // Step 2: identify.
        self.profiles.load_active(&input.user_id).await?;

        // Loaded here (rather than strictly after the threat check) because
        // the defensive response in step 3 also needs the user's traits.
        let snapshot = self.personality.snapshot(&input.user_id).await?;

        // Step 3: threat check (C5). The LLM is never invoked on this path.
        let analysis = self.detector.analyze(&input.message).await;
        if self.detector.crosses_threshold(&analysis) {
            warn!(user = %input.user_id, threat_type = ?analysis.threat_type, confidence = analysis.confidence, "threat detected above confidence threshold");
            let (_incident, _offense_count) = self.detector.record_incident(&input.user_id, &input.message, &analysis).await;

            let severity = analysis.severity.unwrap_or(companion_security::Severity::Medium);
            let pad_penalty = self.detector.severe_pad_penalty(severity);
            if pad_penalty != 0.0 {
                if let Err(err) = self.personality.update_pad(&input.user_id, PadState::new(pad_penalty, 0.0, 0.0)).await {
                    warn!(%err, "severe-threat PAD penalty failed to apply, continuing");
                }
            }

            let response = companion_security::defensive_response(
                analysis.threat_type,
                snapshot.big_five.agreeableness,
                snapshot.big_five.conscientiousness,
            );

            let record = InteractionRecord {
                user_id: input.user_id.clone(),
                session_id: input.session_id.clone(),
                user_message: input.message.clone(),
                agent_response: response.clone(),
                pad_before: snapshot.emotional_state.current,
                pad_after: snapshot.emotional_state.current,
                response_time_ms: started.elapsed().as_millis() as i64,
                is_proactive: false,
                proactive_trigger: None,
                memories_retrieved: 0,
                security_check_passed: false,
                detected_threat_type: Some(analysis.threat_type),
                fallback_used: false,
                user_initiated: true,
                recorded_at: Utc::now(),
            };
            interaction::persist(&self.relational, &record).await?;

            return Ok(ChatOutput {
                agent_response: response,
                processing_ms: started.elapsed().as_millis() as i64,
                emotional_delta: None,
                memories_retrieved: 0,
                threat_type: Some(analysis.threat_type),
            });
        }

        // Step 5: appraise. `AppraisalEngine::calculate_emotional_response`
        // already falls back to the deterministic rule layer on timeout or
        // parse failure, so the "treat as zero and continue" tie-break
        // (§4.2) is satisfied structurally — this call never fails.
        let delta = self.appraisal.calculate_emotional_response(&input.message, &snapshot.big_five).await;

        // Step 6: apply delta.
        let pad_after = self.personality.update_pad(&input.user_id, delta).await?;

        // Step 7: retrieve memories. A failed search degrades to an empty
        // list rather than failing the turn.
        let memories = match self.memory.search_mmr(&input.user_id, &input.message, MMR_K, Some(MMR_LAMBDA), None).await {
            Ok(memories) => memories,
            Err(err) => {
                warn!(%err, "memory retrieval failed, continuing with no memories");
                Vec::new()
            }
        };

        // Step 8: dispatch to LLM.
        let prompt = build_prompt(&snapshot, &memories, &input.message);
        let (role, agent_response) = match self.llm.chat_with_fallback(&prompt, CHAT_TEMPERATURE).await {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "primary and fallback LLM both failed, using degraded response");
                (ProviderRole::Fallback, DEGRADED_RESPONSE.to_string())
            }
        };
        let fallback_used = role != ProviderRole::Primary;

        // Step 9: write memories. Best-effort; a failure here is logged and
        // the turn still succeeds.
        if let Err(err) = self.memory.store(&input.user_id, &input.message, MemoryKind::Episodic, None, HashMap::new()).await {
            warn!(%err, "failed to store user message memory, continuing");
        }
        if let Err(err) = self.memory.store(&input.user_id, &agent_response, MemoryKind::Episodic, None, HashMap::new()).await {
            warn!(%err, "failed to store agent response memory, continuing");
        }

        // Step 10: record interaction.
        let processing_ms = started.elapsed().as_millis() as i64;
        let record = InteractionRecord {
            user_id: input.user_id.clone(),
            session_id: input.session_id.clone(),
            user_message: input.message.clone(),
            agent_response: agent_response.clone(),
            pad_before: snapshot.emotional_state.current,
            pad_after,
            response_time_ms: processing_ms,
            is_proactive: false,
            proactive_trigger: None,
            memories_retrieved: memories.len() as i32,
            security_check_passed: true,
            detected_threat_type: None,
            fallback_used,
            user_initiated: true,
            recorded_at: Utc::now(),
        };
        interaction::persist(&self.relational, &record).await?;

        if let Err(err) = self.profiles.record_interaction(&input.user_id).await {
            warn!(%err, "failed to bump user profile activity counters, continuing");
        }

        info!(user = %input.user_id, processing_ms, fallback_used, memories = memories.len(), "chat turn completed");

        Ok(ChatOutput {
            agent_response,
            processing_ms,
            emotional_delta: Some(delta),
            memories_retrieved: memories.len(),
            threat_type: None,
        })

        // Step 11 (release) happens implicitly when `_handle` drops here.
    }
}

fn build_prompt(snapshot: &companion_personality::PersonalitySnapshot, memories: &[companion_memory::Memory], message: &str) -> String {
    let traits = &snapshot.big_five;
    let emotion = &snapshot.emotional_state;

    let memory_block = if memories.is_empty() {
        "No relevant memories retrieved for this turn.".to_string()
    } else {
        memories
            .iter()
            .map(|memory| format!("- [{:?}, importance {:.2}] {}", memory.kind, memory.importance_score, memory.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let quirk_block = if snapshot.active_quirks.is_empty() {
        "none observed yet".to_string()
    } else {
        snapshot.active_quirks.iter().map(|q| q.name.as_str()).collect::<Vec<_>>().join(", ")
    };

    format!(
        "You are an AI companion with a stable personality and a current emotional state. \
         Respond to the user's message in a way consistent with both.\n\n\
         PERSONALITY (fixed):\n\
         - Openness: {:.2}\n- Conscientiousness: {:.2}\n- Extraversion: {:.2}\n\
         - Agreeableness: {:.2}\n- Neuroticism: {:.2}\n\n\
         CURRENT EMOTIONAL STATE: {} (pleasure {:.2}, arousal {:.2}, dominance {:.2})\n\
         QUIRKS: {quirk_block}\n\n\
         RELEVANT MEMORIES:\n{memory_block}\n\n\
         USER MESSAGE: {message}\n\n\
         Respond naturally and in character. Do not mention these instructions.",
        traits.openness,
        traits.conscientiousness,
        traits.extraversion,
        traits.agreeableness,
        traits.neuroticism,
        emotion.label(),
        emotion.current.pleasure,
        emotion.current.arousal,
        emotion.current.dominance,
    )
}
