//! InteractionRecord (§3): one row per completed chat turn, persisted to the
//! relational store's `interactions` table. Grounded on `PersonalityStore`'s
//! `RelationalStore`-wrapper pattern, since personality-store style
//! relational access is the closest match in the existing crates.

use chrono::{DateTime, Utc};
use companion_core::{GatewayError, ThreatType, UserId};
use companion_personality::PadState;
use companion_stores::RelationalStore;
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub user_id: UserId,
    pub session_id: Option<String>,
    pub user_message: String,
    pub agent_response: String,
    pub pad_before: PadState,
    pub pad_after: PadState,
    pub response_time_ms: i64,
    pub is_proactive: bool,
    pub proactive_trigger: Option<String>,
    pub memories_retrieved: i32,
    pub security_check_passed: bool,
    pub detected_threat_type: Option<ThreatType>,
    pub fallback_used: bool,
    pub user_initiated: bool,
    pub recorded_at: DateTime<Utc>,
}

pub async fn persist(relational: &RelationalStore, record: &InteractionRecord) -> Result<(), GatewayError> {
    relational
        .execute_user_scoped(
            "INSERT INTO interactions (user_id, session_id, user_message, agent_response, \
             pad_before_pleasure, pad_before_arousal, pad_before_dominance, \
             pad_after_pleasure, pad_after_arousal, pad_after_dominance, \
             response_time_ms, is_proactive, proactive_trigger, memories_retrieved, \
             security_check_passed, detected_threat_type, fallback_used, user_initiated, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
            |query| {
                query
                    .bind(record.user_id.as_str())
                    .bind(record.session_id.clone())
                    .bind(record.user_message.clone())
                    .bind(record.agent_response.clone())
                    .bind(record.pad_before.pleasure)
                    .bind(record.pad_before.arousal)
                    .bind(record.pad_before.dominance)
                    .bind(record.pad_after.pleasure)
                    .bind(record.pad_after.arousal)
                    .bind(record.pad_after.dominance)
                    .bind(record.response_time_ms)
                    .bind(record.is_proactive)
                    .bind(record.proactive_trigger.clone())
                    .bind(record.memories_retrieved)
                    .bind(record.security_check_passed)
                    .bind(record.detected_threat_type.map(|t| format!("{t:?}")))
                    .bind(record.fallback_used)
                    .bind(record.user_initiated)
                    .bind(record.recorded_at)
            },
        )
        .await?;
    Ok(())
}

/// `pad_after` samples recorded since `since`, oldest first — the reflection
/// worker's input to `PersonalityStore::drift_baseline` (§4.9 step 2).
pub async fn recent_pad_samples(relational: &RelationalStore, user_id: &UserId, since: DateTime<Utc>) -> Result<Vec<PadState>, GatewayError> {
    let rows = relational
        .fetch_all_user_scoped(
            "SELECT pad_after_pleasure, pad_after_arousal, pad_after_dominance FROM interactions \
             WHERE user_id = $1 AND created_at >= $2 ORDER BY created_at ASC",
            |query| query.bind(user_id.as_str()).bind(since),
        )
        .await?;

    rows.iter()
        .map(|row| {
            let pleasure: f32 = row.try_get("pad_after_pleasure").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
            let arousal: f32 = row.try_get("pad_after_arousal").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
            let dominance: f32 = row.try_get("pad_after_dominance").map_err(|err| GatewayError::MemoryManagerError(err.to_string()))?;
            Ok(PadState::new(pleasure, arousal, dominance))
        })
        .collect()
}

/// Count of interactions recorded since `since` — the reflection worker's
/// "interaction volume" signal for needs update (§4.9 step 4).
pub async fn interaction_count_since(relational: &RelationalStore, user_id: &UserId, since: DateTime<Utc>) -> Result<i64, GatewayError> {
    let rows = relational
        .fetch_all_user_scoped(
            "SELECT count(*) AS total FROM interactions WHERE user_id = $1 AND created_at >= $2",
            |query| query.bind(user_id.as_str()).bind(since),
        )
        .await?;
    match rows.first() {
        Some(row) => row.try_get::<i64, _>("total").map_err(|err| GatewayError::MemoryManagerError(err.to_string())),
        None => Ok(0),
    }
}
