//! Personality store (C6): persists trait vectors, PAD state, quirks, and
//! psychological needs through `companion_stores::RelationalStore`. Every
//! query runs through the shared SQL guard, and `traits` rows are only ever
//! inserted once per user — there is no update path for them, which is how
//! the Big-Five-is-fixed invariant (§3) is enforced at the store boundary.

use chrono::{DateTime, Utc};
use companion_core::{GatewayError, UserId};
use companion_stores::RelationalStore;
use sqlx::Row;

use crate::needs::{NeedType, PsychologicalNeed};
use crate::pad::{EmotionalState, PadState};
use crate::quirk::{Quirk, QuirkCategory};
use crate::traits::TraitVector;

/// Complete personality state for a user at a point in time (§3
/// `PersonalitySnapshot`).
#[derive(Debug, Clone)]
pub struct PersonalitySnapshot {
    pub user_id: UserId,
    pub big_five: TraitVector,
    pub emotional_state: EmotionalState,
    pub active_quirks: Vec<Quirk>,
    pub needs: Vec<PsychologicalNeed>,
}

#[derive(Clone)]
pub struct PersonalityStore {
    relational: RelationalStore,
}

impl PersonalityStore {
    pub fn new(relational: RelationalStore) -> Self {
        Self { relational }
    }

    /// Creates the trait vector, initial PAD state, and the five default
    /// psychological needs for a user. Idempotent: a second call for the
    /// same user is a no-op (`ON CONFLICT DO NOTHING`), since traits must
    /// never be overwritten once set.
    pub async fn init(&self, user_id: &UserId, big_five: TraitVector) -> Result<(), GatewayError> {
        self.relational
            .execute_user_scoped(
                "INSERT INTO personality_traits (user_id, openness, conscientiousness, extraversion, agreeableness, neuroticism) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (user_id) DO NOTHING",
                |query| {
                    query
                        .bind(user_id.as_str())
                        .bind(big_five.openness)
                        .bind(big_five.conscientiousness)
                        .bind(big_five.extraversion)
                        .bind(big_five.agreeableness)
                        .bind(big_five.neuroticism)
                },
            )
            .await?;

        self.relational
            .execute_user_scoped(
                "INSERT INTO pad_state (user_id, pleasure, arousal, dominance, baseline_pleasure, baseline_arousal, baseline_dominance, updated_at) \
                 VALUES ($1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, $2) ON CONFLICT (user_id) DO NOTHING",
                |query| query.bind(user_id.as_str()).bind(Utc::now()),
            )
            .await?;

        for need_type in NeedType::ALL {
            let need = PsychologicalNeed::default_for(need_type);
            self.relational
                .execute_user_scoped(
                    "INSERT INTO psychological_needs (user_id, need_type, current_level, baseline_level, decay_rate, trigger_threshold, satisfaction_rate) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (user_id, need_type) DO NOTHING",
                    |query| {
                        query
                            .bind(user_id.as_str())
                            .bind(need.need_type.as_str())
                            .bind(need.current_level)
                            .bind(need.baseline_level)
                            .bind(need.decay_rate)
                            .bind(need.trigger_threshold)
                            .bind(need.satisfaction_rate)
                    },
                )
                .await?;
        }

        Ok(())
    }

    pub async fn snapshot(&self, user_id: &UserId) -> Result<PersonalitySnapshot, GatewayError> {
        let trait_rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT openness, conscientiousness, extraversion, agreeableness, neuroticism FROM personality_traits WHERE user_id = $1",
                |query| query.bind(user_id.as_str()),
            )
            .await?;
        let trait_row = trait_rows.first().ok_or_else(|| GatewayError::UserNotFound(user_id.clone()))?;
        let big_five = TraitVector::new(
            trait_row.try_get("openness").map_err(column_error("openness"))?,
            trait_row.try_get("conscientiousness").map_err(column_error("conscientiousness"))?,
            trait_row.try_get("extraversion").map_err(column_error("extraversion"))?,
            trait_row.try_get("agreeableness").map_err(column_error("agreeableness"))?,
            trait_row.try_get("neuroticism").map_err(column_error("neuroticism"))?,
        );

        let pad_rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT pleasure, arousal, dominance, baseline_pleasure, baseline_arousal, baseline_dominance, updated_at FROM pad_state WHERE user_id = $1",
                |query| query.bind(user_id.as_str()),
            )
            .await?;
        let pad_row = pad_rows.first().ok_or_else(|| GatewayError::UserNotFound(user_id.clone()))?;
        let current = PadState::new(
            pad_row.try_get("pleasure").map_err(column_error("pleasure"))?,
            pad_row.try_get("arousal").map_err(column_error("arousal"))?,
            pad_row.try_get("dominance").map_err(column_error("dominance"))?,
        );
        let baseline = PadState::new(
            pad_row.try_get("baseline_pleasure").map_err(column_error("baseline_pleasure"))?,
            pad_row.try_get("baseline_arousal").map_err(column_error("baseline_arousal"))?,
            pad_row.try_get("baseline_dominance").map_err(column_error("baseline_dominance"))?,
        );
        let updated_at: DateTime<Utc> = pad_row.try_get("updated_at").map_err(column_error("updated_at"))?;
        let emotional_state = EmotionalState::new(current, baseline, updated_at);

        let quirk_rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT id, name, category, description, strength, confidence, decay_rate, is_active, last_reinforced \
                 FROM quirks WHERE user_id = $1 AND is_active = true",
                |query| query.bind(user_id.as_str()),
            )
            .await?;
        let mut active_quirks = Vec::with_capacity(quirk_rows.len());
        for row in &quirk_rows {
            let category: String = row.try_get("category").map_err(column_error("category"))?;
            active_quirks.push(Quirk {
                id: row.try_get("id").map_err(column_error("id"))?,
                name: row.try_get("name").map_err(column_error("name"))?,
                category: QuirkCategory::parse(&category)?,
                description: row.try_get("description").map_err(column_error("description"))?,
                strength: row.try_get("strength").map_err(column_error("strength"))?,
                confidence: row.try_get("confidence").map_err(column_error("confidence"))?,
                decay_rate: row.try_get("decay_rate").map_err(column_error("decay_rate"))?,
                active: row.try_get("is_active").map_err(column_error("is_active"))?,
                last_reinforced: row.try_get("last_reinforced").map_err(column_error("last_reinforced"))?,
            });
        }

        let need_rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT need_type, current_level, baseline_level, decay_rate, trigger_threshold, satisfaction_rate \
                 FROM psychological_needs WHERE user_id = $1",
                |query| query.bind(user_id.as_str()),
            )
            .await?;
        let mut needs = Vec::with_capacity(need_rows.len());
        for row in &need_rows {
            let need_type: String = row.try_get("need_type").map_err(column_error("need_type"))?;
            needs.push(PsychologicalNeed {
                need_type: NeedType::parse(&need_type)?,
                current_level: row.try_get("current_level").map_err(column_error("current_level"))?,
                baseline_level: row.try_get("baseline_level").map_err(column_error("baseline_level"))?,
                decay_rate: row.try_get("decay_rate").map_err(column_error("decay_rate"))?,
                trigger_threshold: row.try_get("trigger_threshold").map_err(column_error("trigger_threshold"))?,
                satisfaction_rate: row.try_get("satisfaction_rate").map_err(column_error("satisfaction_rate"))?,
            });
        }

        Ok(PersonalitySnapshot { user_id: user_id.clone(), big_five, emotional_state, active_quirks, needs })
    }

    /// Applies `delta` to the current PAD state and persists the clamped
    /// result (§4.2, §4.3). Never touches the baseline.
    pub async fn update_pad(&self, user_id: &UserId, delta: PadState) -> Result<PadState, GatewayError> {
        let snapshot = self.snapshot(user_id).await?;
        let new_current = snapshot.emotional_state.current.add(delta);

        self.relational
            .execute_user_scoped(
                "UPDATE pad_state SET pleasure = $2, arousal = $3, dominance = $4, updated_at = $5 WHERE user_id = $1",
                |query| {
                    query
                        .bind(user_id.as_str())
                        .bind(new_current.pleasure)
                        .bind(new_current.arousal)
                        .bind(new_current.dominance)
                        .bind(Utc::now())
                },
            )
            .await?;

        Ok(new_current)
    }

    /// Nightly baseline drift (§11), applied only when enough recent
    /// interactions exist; `recent_current_samples` is supplied by the
    /// caller from the interaction log.
    pub async fn drift_baseline(
        &self,
        user_id: &UserId,
        recent_current_samples: &[PadState],
        rate: f32,
    ) -> Result<Option<PadState>, GatewayError> {
        let snapshot = self.snapshot(user_id).await?;
        let Some(new_baseline) = EmotionalState::drift_baseline(snapshot.emotional_state.baseline, recent_current_samples, rate)
        else {
            return Ok(None);
        };

        self.relational
            .execute_user_scoped(
                "UPDATE pad_state SET baseline_pleasure = $2, baseline_arousal = $3, baseline_dominance = $4 WHERE user_id = $1",
                |query| {
                    query
                        .bind(user_id.as_str())
                        .bind(new_baseline.pleasure)
                        .bind(new_baseline.arousal)
                        .bind(new_baseline.dominance)
                },
            )
            .await?;

        Ok(Some(new_baseline))
    }

    /// Reinforces an existing quirk by name, or inserts a new one at default
    /// strength if this is the first time it's been observed (§4.9).
    pub async fn reinforce_quirk(
        &self,
        user_id: &UserId,
        name: &str,
        category: QuirkCategory,
        description: &str,
        rate: f32,
    ) -> Result<(), GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped("SELECT strength, confidence FROM quirks WHERE user_id = $1 AND name = $2", |query| {
                query.bind(user_id.as_str()).bind(name)
            })
            .await?;

        if let Some(row) = rows.first() {
            let strength: f32 = row.try_get("strength").map_err(column_error("strength"))?;
            let confidence: f32 = row.try_get("confidence").map_err(column_error("confidence"))?;
            let new_strength = (strength + rate).min(1.0);
            let new_confidence = (confidence + rate * 0.5).min(1.0);
            self.relational
                .execute_user_scoped(
                    "UPDATE quirks SET strength = $3, confidence = $4, is_active = true, last_reinforced = $5 \
                     WHERE user_id = $1 AND name = $2",
                    |query| {
                        query
                            .bind(user_id.as_str())
                            .bind(name)
                            .bind(new_strength)
                            .bind(new_confidence)
                            .bind(Utc::now())
                    },
                )
                .await?;
        } else {
            let quirk = Quirk::new(name, category, description);
            self.relational
                .execute_user_scoped(
                    "INSERT INTO quirks (id, user_id, name, category, description, strength, confidence, decay_rate, is_active, last_reinforced) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                    |query| {
                        query
                            .bind(quirk.id.clone())
                            .bind(user_id.as_str())
                            .bind(quirk.name.clone())
                            .bind(quirk.category.as_str())
                            .bind(quirk.description.clone())
                            .bind(quirk.strength)
                            .bind(quirk.confidence)
                            .bind(quirk.decay_rate)
                            .bind(quirk.active)
                            .bind(quirk.last_reinforced)
                    },
                )
                .await?;
        }

        Ok(())
    }

    /// Applies hour-scaled exponential decay to every active quirk for a
    /// user, deactivating any that drop below the active threshold (§3).
    pub async fn decay_quirks(&self, user_id: &UserId, hours: f32) -> Result<(), GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped("SELECT id, name, category, description, strength, confidence, decay_rate, is_active, last_reinforced FROM quirks WHERE user_id = $1 AND is_active = true", |query| {
                query.bind(user_id.as_str())
            })
            .await?;

        for row in &rows {
            let category: String = row.try_get("category").map_err(column_error("category"))?;
            let mut quirk = Quirk {
                id: row.try_get("id").map_err(column_error("id"))?,
                name: row.try_get("name").map_err(column_error("name"))?,
                category: QuirkCategory::parse(&category)?,
                description: row.try_get("description").map_err(column_error("description"))?,
                strength: row.try_get("strength").map_err(column_error("strength"))?,
                confidence: row.try_get("confidence").map_err(column_error("confidence"))?,
                decay_rate: row.try_get("decay_rate").map_err(column_error("decay_rate"))?,
                active: row.try_get("is_active").map_err(column_error("is_active"))?,
                last_reinforced: row.try_get("last_reinforced").map_err(column_error("last_reinforced"))?,
            };
            quirk.decay(hours);

            self.relational
                .execute_user_scoped(
                    "UPDATE quirks SET strength = $3, is_active = $4 WHERE user_id = $1 AND id = $2",
                    |query| query.bind(user_id.as_str()).bind(quirk.id.clone()).bind(quirk.strength).bind(quirk.active),
                )
                .await?;
        }

        Ok(())
    }

    /// Applies `delta` to a single psychological need's current level
    /// (positive values raise it toward urgency, negative values satisfy
    /// it), clamped to [0.0, 1.0].
    pub async fn update_need(&self, user_id: &UserId, need_type: NeedType, delta: f32) -> Result<f32, GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped("SELECT current_level FROM psychological_needs WHERE user_id = $1 AND need_type = $2", |query| {
                query.bind(user_id.as_str()).bind(need_type.as_str())
            })
            .await?;
        let current: f32 = rows
            .first()
            .ok_or_else(|| GatewayError::UserNotFound(user_id.clone()))?
            .try_get("current_level")
            .map_err(column_error("current_level"))?;
        let new_level = (current + delta).clamp(0.0, 1.0);

        self.relational
            .execute_user_scoped(
                "UPDATE psychological_needs SET current_level = $3 WHERE user_id = $1 AND need_type = $2",
                |query| query.bind(user_id.as_str()).bind(need_type.as_str()).bind(new_level),
            )
            .await?;

        Ok(new_level)
    }

    /// Applies an hour-scaled rise-toward-urgency to every need for a user
    /// (§3, §4.10 `needs_decay` job), mirroring `decay_quirks`'s
    /// fetch-mutate-write shape.
    pub async fn decay_needs(&self, user_id: &UserId, hours: f32) -> Result<(), GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT need_type, current_level, baseline_level, decay_rate, trigger_threshold, satisfaction_rate \
                 FROM psychological_needs WHERE user_id = $1",
                |query| query.bind(user_id.as_str()),
            )
            .await?;

        for row in &rows {
            let need_type: String = row.try_get("need_type").map_err(column_error("need_type"))?;
            let mut need = PsychologicalNeed {
                need_type: NeedType::parse(&need_type)?,
                current_level: row.try_get("current_level").map_err(column_error("current_level"))?,
                baseline_level: row.try_get("baseline_level").map_err(column_error("baseline_level"))?,
                decay_rate: row.try_get("decay_rate").map_err(column_error("decay_rate"))?,
                trigger_threshold: row.try_get("trigger_threshold").map_err(column_error("trigger_threshold"))?,
                satisfaction_rate: row.try_get("satisfaction_rate").map_err(column_error("satisfaction_rate"))?,
            };
            need.decay(hours);

            self.relational
                .execute_user_scoped(
                    "UPDATE psychological_needs SET current_level = $3 WHERE user_id = $1 AND need_type = $2",
                    |query| query.bind(user_id.as_str()).bind(need_type.as_str()).bind(need.current_level),
                )
                .await?;
        }

        Ok(())
    }
}

fn column_error(column: &'static str) -> impl Fn(sqlx::Error) -> GatewayError {
    move |err| GatewayError::PersonalityEngineError(format!("missing or malformed column {column}: {err}"))
}
