//! Proactive scorer (C11): composite initiation scoring plus rate limiting
//! (§4.8), run by the scheduler's `proactive_sweep` job. The starter message
//! comes from the LLM when it's reachable, falling back to a per-trigger
//! template bank otherwise; the scoring formula itself is built straight
//! from the weights in §4.8.
//!
//! The timing and interaction terms are approximated from the signals this
//! system actually tracks (`UserProfile.last_active`, `total_interactions`)
//! rather than a dedicated hourly/weekly activity histogram, which no
//! component in §3's ownership model stores — see DESIGN.md.

use std::sync::Arc;

use chrono::Utc;
use companion_core::{GatewayError, UserId};
use companion_llm::LlmRouter;
use companion_personality::{PersonalitySnapshot, PersonalityStore};
use companion_stores::{KvCache, RelationalStore, UserProfileStore};
use tracing::{info, warn};

use crate::interaction::{self, InteractionRecord};

const MIN_GAP_HOURS: i64 = 4;
const DECLINE_SUPPRESS_SECS: u64 = 24 * 3600;
const LAST_SENT_TTL_SECS: u64 = 30 * 24 * 3600;
const DAILY_COUNT_TTL_SECS: u64 = 25 * 3600;
const INITIATION_THRESHOLD: f32 = 0.6;
const STARTER_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    NeedBased,
    TimingBased,
    PatternBased,
    General,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::NeedBased => "need_based",
            TriggerKind::TimingBased => "timing_based",
            TriggerKind::PatternBased => "pattern_based",
            TriggerKind::General => "general",
        }
    }

    fn template(self) -> &'static str {
        match self {
            TriggerKind::NeedBased => "Hey, I was thinking about you — how have you been feeling lately?",
            TriggerKind::TimingBased => "Hi! It's been a little while since we last talked, wanted to check in.",
            TriggerKind::PatternBased => "I noticed we keep coming back to similar things lately — want to dig into that a bit more?",
            TriggerKind::General => "Just thinking of you — how's your day going?",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProactiveOutput {
    pub trigger: TriggerKind,
    pub message: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct ProactiveScorer {
    profiles: UserProfileStore,
    personality: PersonalityStore,
    llm: LlmRouter,
    kv: Arc<KvCache>,
    relational: RelationalStore,
    max_per_day: u32,
}

impl ProactiveScorer {
    pub fn new(
        profiles: UserProfileStore,
        personality: PersonalityStore,
        llm: LlmRouter,
        kv: Arc<KvCache>,
        relational: RelationalStore,
        max_per_day: u32,
    ) -> Self {
        Self { profiles, personality, llm, kv, relational, max_per_day }
    }

    /// Runs the full rate-limit-then-score-then-dispatch flow for one user
    /// (§4.8). `Ok(None)` covers every "stay silent" path: suppressed by a
    /// rate limit, or scored below threshold.
    pub async fn maybe_initiate(&self, user_id: &UserId) -> Result<Option<ProactiveOutput>, GatewayError> {
        if !self.profiles.is_eligible_for_proactive(user_id).await? {
            return Ok(None);
        }
        if self.kv.get_string(&decline_key(user_id)).await.is_some() {
            return Ok(None);
        }
        let daily_count = self.kv.get_string(&daily_count_key(user_id)).await.and_then(|raw| raw.parse::<u32>().ok()).unwrap_or(0);
        if daily_count >= self.max_per_day {
            return Ok(None);
        }

        let last_sent = self.kv.get_string(&last_sent_key(user_id)).await.and_then(|raw| raw.parse::<i64>().ok());
        let gap_hours = last_sent.map(|ts| (Utc::now().timestamp() - ts) as f32 / 3600.0);
        if let Some(gap) = gap_hours {
            if gap < MIN_GAP_HOURS as f32 {
                return Ok(None);
            }
        }

        let snapshot = self.personality.snapshot(user_id).await?;
        let profile = self.profiles.load(user_id).await?;
        let activity_gap_hours = (Utc::now() - profile.last_active).num_seconds() as f32 / 3600.0;

        let need_score = need_score(&snapshot);
        let timing_score = timing_score(activity_gap_hours);
        let personality_factor = personality_factor(&snapshot);
        let interaction_score = interaction_score(profile.total_interactions, activity_gap_hours);
        let recent_penalty = gap_hours.map(|gap| (1.0 - gap / MIN_GAP_HOURS as f32).clamp(0.0, 1.0)).unwrap_or(0.0);

        let total = (0.4 * need_score + 0.25 * timing_score + 0.35 * interaction_score) * personality_factor * (1.0 - recent_penalty).max(0.1);

        if total < INITIATION_THRESHOLD {
            return Ok(None);
        }

        let trigger = pick_trigger(&snapshot, activity_gap_hours);
        let message = self.generate_starter(&snapshot, trigger).await;

        self.kv.set_string_ex(&last_sent_key(user_id), &Utc::now().timestamp().to_string(), std::time::Duration::from_secs(LAST_SENT_TTL_SECS)).await;
        self.kv
            .set_string_ex(&daily_count_key(user_id), &(daily_count + 1).to_string(), std::time::Duration::from_secs(DAILY_COUNT_TTL_SECS))
            .await;

        let record = InteractionRecord {
            user_id: user_id.clone(),
            session_id: None,
            user_message: String::new(),
            agent_response: message.clone(),
            pad_before: snapshot.emotional_state.current,
            pad_after: snapshot.emotional_state.current,
            response_time_ms: 0,
            is_proactive: true,
            proactive_trigger: Some(trigger.as_str().to_string()),
            memories_retrieved: 0,
            security_check_passed: true,
            detected_threat_type: None,
            fallback_used: false,
            user_initiated: false,
            recorded_at: Utc::now(),
        };
        interaction::persist(&self.relational, &record).await?;

        info!(%user_id, trigger = trigger.as_str(), score = total, "proactive message triggered");
        Ok(Some(ProactiveOutput { trigger, message, score: total }))
    }

    async fn generate_starter(&self, snapshot: &PersonalitySnapshot, trigger: TriggerKind) -> String {
        let prompt = starter_prompt(snapshot, trigger);
        match self.llm.chat_with_fallback(&prompt, STARTER_TEMPERATURE).await {
            Ok((_, text)) if !text.trim().is_empty() => text,
            Ok(_) => trigger.template().to_string(),
            Err(err) => {
                warn!(%err, "proactive starter generation failed, using template bank");
                trigger.template().to_string()
            }
        }
    }
}

fn decline_key(user_id: &UserId) -> String {
    format!("proactive:{}:declined_at", user_id.as_str())
}

fn last_sent_key(user_id: &UserId) -> String {
    format!("proactive:{}:last_sent", user_id.as_str())
}

fn daily_count_key(user_id: &UserId) -> String {
    format!("proactive:{}:count:{}", user_id.as_str(), Utc::now().format("%Y%m%d"))
}

/// `need_score` (§4.8): weighted sum across urgent needs of
/// `(current - threshold) / (1 - threshold)`, normalized to [0,1].
fn need_score(snapshot: &PersonalitySnapshot) -> f32 {
    let urgent: Vec<_> = snapshot.needs.iter().filter(|need| need.is_urgent()).collect();
    if urgent.is_empty() {
        return 0.0;
    }
    let sum: f32 = urgent
        .iter()
        .map(|need| {
            let denom = (1.0 - need.trigger_threshold).max(0.01);
            ((need.current_level - need.trigger_threshold) / denom).clamp(0.0, 1.0)
        })
        .sum();
    (sum / urgent.len() as f32).clamp(0.0, 1.0)
}

/// `timing_score` approximation (§4.8, see module doc): rewards a gap in a
/// plausible "been a while, not too long" band and penalizes both ends.
fn timing_score(activity_gap_hours: f32) -> f32 {
    if activity_gap_hours < 4.0 {
        0.1
    } else if activity_gap_hours > 72.0 {
        0.2
    } else {
        // Peaks around 24h, tapering off toward the 4h/72h edges.
        let distance = (activity_gap_hours - 24.0).abs();
        (1.0 - distance / 48.0).clamp(0.0, 1.0)
    }
}

/// `personality_factor` (§4.8): `1.0 + Σ weight(trait)·(trait − 0.5)`
/// combined with a PAD-derived multiplier, clamped to [0.3, 1.7].
fn personality_factor(snapshot: &PersonalitySnapshot) -> f32 {
    let traits = &snapshot.big_five;
    let trait_term = 1.0
        + 0.3 * (traits.extraversion - 0.5)
        + 0.2 * (traits.agreeableness - 0.5)
        + 0.1 * (traits.openness - 0.5);

    let pad = snapshot.emotional_state.current;
    let pad_term = 1.0 + 0.2 * pad.pleasure + 0.1 * (1.0 - (pad.arousal - 0.5).abs() * 2.0) + 0.1 * pad.dominance;

    (trait_term * pad_term).clamp(0.3, 1.7)
}

/// `interaction_score` approximation (§4.8, see module doc): more history
/// and a moderate recent gap both raise the score; a very fresh or very
/// stale relationship lowers it.
fn interaction_score(total_interactions: i64, activity_gap_hours: f32) -> f32 {
    let history_term = (total_interactions as f32 / 50.0).clamp(0.0, 1.0);
    let recency_term = timing_score(activity_gap_hours);
    (0.5 * history_term + 0.5 * recency_term).clamp(0.0, 1.0)
}

fn pick_trigger(snapshot: &PersonalitySnapshot, activity_gap_hours: f32) -> TriggerKind {
    if snapshot.needs.iter().any(|need| need.is_urgent()) {
        TriggerKind::NeedBased
    } else if snapshot.active_quirks.iter().any(|quirk| quirk.strength >= 0.6) {
        TriggerKind::PatternBased
    } else if activity_gap_hours > 18.0 {
        TriggerKind::TimingBased
    } else {
        TriggerKind::General
    }
}

fn starter_prompt(snapshot: &PersonalitySnapshot, trigger: TriggerKind) -> String {
    let urgent_needs = snapshot
        .needs
        .iter()
        .filter(|need| need.is_urgent())
        .map(|need| need.need_type.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are an AI companion deciding to reach out to the user first, unprompted. \
         The reason for reaching out is: {trigger}.\n\
         Urgent needs driving this (if any): {needs}\n\
         Write one short, warm, natural message (1-2 sentences) to send as the opener. \
         Do not mention scores, needs, or internal reasoning.",
        trigger = trigger.as_str(),
        needs = if urgent_needs.is_empty() { "none".to_string() } else { urgent_needs },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_score_peaks_around_a_day() {
        assert!(timing_score(24.0) > timing_score(4.5));
        assert!(timing_score(24.0) > timing_score(71.0));
    }

    #[test]
    fn timing_score_penalizes_both_edges() {
        assert!(timing_score(1.0) < 0.5);
        assert!(timing_score(100.0) < 0.5);
    }
}
