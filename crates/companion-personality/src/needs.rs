use companion_core::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeedType {
    Social,
    Intellectual,
    Creative,
    Rest,
    Validation,
}

impl NeedType {
    pub const ALL: [NeedType; 5] =
        [NeedType::Social, NeedType::Intellectual, NeedType::Creative, NeedType::Rest, NeedType::Validation];

    pub fn as_str(&self) -> &'static str {
        match self {
            NeedType::Social => "social",
            NeedType::Intellectual => "intellectual",
            NeedType::Creative => "creative",
            NeedType::Rest => "rest",
            NeedType::Validation => "validation",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        match raw {
            "social" => Ok(NeedType::Social),
            "intellectual" => Ok(NeedType::Intellectual),
            "creative" => Ok(NeedType::Creative),
            "rest" => Ok(NeedType::Rest),
            "validation" => Ok(NeedType::Validation),
            other => Err(GatewayError::PersonalityEngineError(format!("unknown need type: {other}"))),
        }
    }
}

/// A psychological need with decay-toward-urgency and
/// satisfaction-on-interaction mechanics (§3). `current_level` rises over
/// time per `decay_rate` and drops by `satisfaction_rate` whenever an
/// interaction addresses it; it becomes "urgent" (proactive-conversation
/// eligible, §4.8) once it reaches `trigger_threshold`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PsychologicalNeed {
    pub need_type: NeedType,
    pub current_level: f32,
    pub baseline_level: f32,
    pub decay_rate: f32,
    pub trigger_threshold: f32,
    pub satisfaction_rate: f32,
}

impl PsychologicalNeed {
    pub fn default_for(need_type: NeedType) -> Self {
        Self {
            need_type,
            current_level: 0.5,
            baseline_level: 0.5,
            decay_rate: 0.02,
            trigger_threshold: 0.8,
            satisfaction_rate: 0.1,
        }
    }

    /// Needs rise toward urgency over time without satisfaction (§4.10's
    /// need-decay scheduler job): `current += decay_rate * hours_elapsed`.
    pub fn decay(&mut self, hours_elapsed: f32) {
        self.current_level = (self.current_level + self.decay_rate * hours_elapsed).clamp(0.0, 1.0);
    }

    /// A conversational turn touching this need satisfies it.
    pub fn satisfy(&mut self) {
        self.current_level = (self.current_level - self.satisfaction_rate).clamp(0.0, 1.0);
    }

    pub fn is_urgent(&self) -> bool {
        self.current_level >= self.trigger_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_increases_level_and_clamps() {
        let mut need = PsychologicalNeed::default_for(NeedType::Social);
        need.current_level = 0.95;
        need.decay_rate = 0.1;
        need.decay(10.0);
        assert_eq!(need.current_level, 1.0);
    }

    #[test]
    fn urgency_trips_at_threshold() {
        let mut need = PsychologicalNeed::default_for(NeedType::Rest);
        need.current_level = 0.79;
        assert!(!need.is_urgent());
        need.current_level = 0.8;
        assert!(need.is_urgent());
    }

    #[test]
    fn satisfy_pulls_level_down() {
        let mut need = PsychologicalNeed::default_for(NeedType::Validation);
        need.current_level = 0.9;
        need.satisfy();
        assert!((need.current_level - 0.8).abs() < 1e-6);
    }

    #[test]
    fn need_type_round_trips() {
        for need_type in NeedType::ALL {
            assert_eq!(NeedType::parse(need_type.as_str()).unwrap(), need_type);
        }
    }
}
