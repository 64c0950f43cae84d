use chrono::{DateTime, Utc};
use companion_core::GatewayError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Below this strength a quirk is considered extinguished and is
/// deactivated rather than left around at a near-zero strength (§3).
pub const MIN_ACTIVE_STRENGTH: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuirkCategory {
    SpeechPattern,
    Behavior,
    Preference,
}

impl QuirkCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuirkCategory::SpeechPattern => "speech_pattern",
            QuirkCategory::Behavior => "behavior",
            QuirkCategory::Preference => "preference",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw {
            "speech_pattern" => Ok(QuirkCategory::SpeechPattern),
            "behavior" => Ok(QuirkCategory::Behavior),
            "preference" => Ok(QuirkCategory::Preference),
            other => Err(GatewayError::PersonalityEngineError(format!("unknown quirk category: {other}"))),
        }
    }
}

/// A behavioral pattern, speech quirk, or preference that evolves through
/// reinforcement and decay (§3). `name` is the stable slug; `description`
/// is the human-readable explanation surfaced in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quirk {
    pub id: String,
    pub name: String,
    pub category: QuirkCategory,
    pub description: String,
    pub strength: f32,
    pub confidence: f32,
    pub decay_rate: f32,
    pub active: bool,
    pub last_reinforced: DateTime<Utc>,
}

impl Quirk {
    pub fn new(name: impl Into<String>, category: QuirkCategory, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            category,
            description: description.into(),
            strength: 0.1,
            confidence: 0.1,
            decay_rate: 0.05,
            active: true,
            last_reinforced: Utc::now(),
        }
    }

    /// Reinforcement nudges strength and confidence upward, capped at 1.0
    /// (§4.9 quirk evolution, run by the nightly reflection worker).
    pub fn reinforce(&mut self, rate: f32, now: DateTime<Utc>) {
        self.strength = (self.strength + rate).min(1.0);
        self.confidence = (self.confidence + rate * 0.5).min(1.0);
        self.last_reinforced = now;
        self.active = true;
    }

    /// Exponential decay over elapsed hours without reinforcement;
    /// deactivates once strength drops below `MIN_ACTIVE_STRENGTH` (§3).
    pub fn decay(&mut self, hours_elapsed: f32) {
        if hours_elapsed <= 0.0 {
            return;
        }
        self.strength *= (1.0 - self.decay_rate).powf(hours_elapsed);
        if self.strength < MIN_ACTIVE_STRENGTH {
            self.strength = 0.0;
            self.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_deactivates_below_threshold() {
        let mut quirk = Quirk::new("trailing_ellipses", QuirkCategory::SpeechPattern, "trails off with ...");
        quirk.strength = 0.06;
        quirk.decay_rate = 0.2;
        quirk.decay(20.0);
        assert!(!quirk.active);
        assert_eq!(quirk.strength, 0.0);
    }

    #[test]
    fn reinforce_caps_at_one_and_reactivates() {
        let mut quirk = Quirk::new("uses_emoji", QuirkCategory::Behavior, "likes emoji");
        quirk.strength = 0.95;
        quirk.active = false;
        quirk.reinforce(0.2, Utc::now());
        assert_eq!(quirk.strength, 1.0);
        assert!(quirk.active);
    }

    #[test]
    fn category_round_trips_through_string() {
        assert_eq!(QuirkCategory::parse("behavior").unwrap().as_str(), "behavior");
        assert!(QuirkCategory::parse("invalid").is_err());
    }
}
