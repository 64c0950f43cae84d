use serde::{Deserialize, Serialize};

/// The Big Five (OCEAN) trait vector. Fixed at creation time (§3: "FIXED
/// trait - never changes after creation"). This type intentionally has no
/// setters — `PersonalityStore` only ever inserts one for a user, it never
/// updates one, which is how the immutability invariant is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    pub openness: f32,
    pub conscientiousness: f32,
    pub extraversion: f32,
    pub agreeableness: f32,
    pub neuroticism: f32,
}

impl TraitVector {
    pub fn new(openness: f32, conscientiousness: f32, extraversion: f32, agreeableness: f32, neuroticism: f32) -> Self {
        Self {
            openness: openness.clamp(0.0, 1.0),
            conscientiousness: conscientiousness.clamp(0.0, 1.0),
            extraversion: extraversion.clamp(0.0, 1.0),
            agreeableness: agreeableness.clamp(0.0, 1.0),
            neuroticism: neuroticism.clamp(0.0, 1.0),
        }
    }
}

impl Default for TraitVector {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.5, 0.5, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_out_of_range_inputs() {
        let traits = TraitVector::new(1.5, -0.5, 0.3, 0.3, 0.3);
        assert_eq!(traits.openness, 1.0);
        assert_eq!(traits.conscientiousness, 0.0);
    }
}
