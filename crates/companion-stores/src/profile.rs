//! User profile store (C1, relational half). Owns `UserProfile` (§3):
//! account-level state such as status and proactive-messaging preference,
//! distinct from the personality state owned by `companion-personality`'s
//! `PersonalityStore`.

use chrono::{DateTime, Utc};
use companion_core::{GatewayError, UserId};
use sqlx::Row;

use crate::relational::RelationalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
    Banned,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Banned => "banned",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "banned" => Ok(UserStatus::Banned),
            other => Err(GatewayError::ChatProcessingError(format!("unknown user status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub status: UserStatus,
    pub proactive_messaging_enabled: bool,
    pub timezone: String,
    pub total_interactions: i64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserProfileStore {
    relational: RelationalStore,
}

impl UserProfileStore {
    pub fn new(relational: RelationalStore) -> Self {
        Self { relational }
    }

    /// First-contact provisioning (§4.2 step 2): idempotent, defaults to
    /// active status with proactive messaging enabled.
    pub async fn ensure_exists(&self, user_id: &UserId, display_name: &str) -> Result<(), GatewayError> {
        self.relational
            .execute_user_scoped(
                "INSERT INTO user_profiles (user_id, display_name, status, proactive_messaging_enabled, timezone, total_interactions, created_at, last_active) \
                 VALUES ($1, $2, 'active', true, 'UTC', 0, $3, $3) ON CONFLICT (user_id) DO NOTHING",
                |query| query.bind(user_id.as_str()).bind(display_name).bind(Utc::now()),
            )
            .await?;
        Ok(())
    }

    /// Loads the profile for the chat pipeline's Identify step. Returns
    /// `UserNotFound` rather than `Forbidden` when no row exists at all;
    /// callers distinguish "never seen" from "seen but not active".
    pub async fn load(&self, user_id: &UserId) -> Result<UserProfile, GatewayError> {
        let rows = self
            .relational
            .fetch_all_user_scoped(
                "SELECT user_id, display_name, status, proactive_messaging_enabled, timezone, total_interactions, created_at, last_active \
                 FROM user_profiles WHERE user_id = $1",
                |query| query.bind(user_id.as_str()),
            )
            .await?;
        let row = rows.first().ok_or_else(|| GatewayError::UserNotFound(user_id.clone()))?;

        let status: String = row.try_get("status").map_err(column_error("status"))?;
        Ok(UserProfile {
            user_id: user_id.clone(),
            display_name: row.try_get("display_name").map_err(column_error("display_name"))?,
            status: UserStatus::parse(&status)?,
            proactive_messaging_enabled: row.try_get("proactive_messaging_enabled").map_err(column_error("proactive_messaging_enabled"))?,
            timezone: row.try_get("timezone").map_err(column_error("timezone"))?,
            total_interactions: row.try_get("total_interactions").map_err(column_error("total_interactions"))?,
            created_at: row.try_get("created_at").map_err(column_error("created_at"))?,
            last_active: row.try_get("last_active").map_err(column_error("last_active"))?,
        })
    }

    /// Loads the profile and enforces the active-status invariant (§4.2 step
    /// 2): any non-active status fails the whole turn with `Forbidden`.
    pub async fn load_active(&self, user_id: &UserId) -> Result<UserProfile, GatewayError> {
        let profile = self.load(user_id).await?;
        if profile.status != UserStatus::Active {
            return Err(GatewayError::Forbidden(user_id.clone()));
        }
        Ok(profile)
    }

    /// Bumps `last_active` and `total_interactions` after a successful chat
    /// turn (§4.2 step 11).
    pub async fn record_interaction(&self, user_id: &UserId) -> Result<(), GatewayError> {
        self.relational
            .execute_user_scoped(
                "UPDATE user_profiles SET total_interactions = total_interactions + 1, last_active = $2 WHERE user_id = $1",
                |query| query.bind(user_id.as_str()).bind(Utc::now()),
            )
            .await?;
        Ok(())
    }

    /// Used by the proactive scorer (§4.8) to skip users who opted out or
    /// who are not active.
    pub async fn is_eligible_for_proactive(&self, user_id: &UserId) -> Result<bool, GatewayError> {
        let profile = self.load(user_id).await?;
        Ok(profile.status == UserStatus::Active && profile.proactive_messaging_enabled)
    }

    /// Cross-user admin path (§4.1, §6 Admin endpoints): the scheduler's
    /// per-job fan-out over the user base. Goes through
    /// `execute_admin_query` rather than a per-user-scoped query since there
    /// is no single `user_id` to scope by.
    pub async fn list_active_user_ids(&self) -> Result<Vec<UserId>, GatewayError> {
        let rows = self.relational.execute_admin_query("SELECT user_id FROM user_profiles WHERE status = 'active'", |query| query).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("user_id").map(UserId::from).map_err(|err| GatewayError::MemoryManagerError(err.to_string())))
            .collect()
    }

    /// Aggregate engagement metrics (§4.10 `engagement_check`): how many
    /// users are active, and how many of those haven't been seen in
    /// `inactive_after_days`.
    pub async fn engagement_snapshot(&self, inactive_after_days: i64) -> Result<EngagementSnapshot, GatewayError> {
        let cutoff = Utc::now() - chrono::Duration::days(inactive_after_days);
        let rows = self
            .relational
            .execute_admin_query(
                "SELECT count(*) FILTER (WHERE status = 'active') AS active_users, \
                 count(*) FILTER (WHERE status = 'active' AND last_active < $1) AS stale_users \
                 FROM user_profiles",
                |query| query.bind(cutoff),
            )
            .await?;
        let row = rows.first().ok_or_else(|| GatewayError::MemoryManagerError("engagement snapshot query returned no rows".to_string()))?;
        Ok(EngagementSnapshot {
            active_users: row.try_get("active_users").map_err(column_error("active_users"))?,
            stale_users: row.try_get("stale_users").map_err(column_error("stale_users"))?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngagementSnapshot {
    pub active_users: i64,
    pub stale_users: i64,
}

fn column_error(column: &'static str) -> impl Fn(sqlx::Error) -> GatewayError {
    move |err| GatewayError::MemoryManagerError(format!("missing or malformed column {column}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [UserStatus::Active, UserStatus::Inactive, UserStatus::Banned] {
            assert_eq!(UserStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(UserStatus::parse("deleted").is_err());
    }
}
