use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A PAD coordinate (pleasure, arousal, dominance), each clamped to
/// [-1.0, 1.0] (§3). Also used as the shape of an emotion *delta* before it
/// is applied to a state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PadState {
    pub pleasure: f32,
    pub arousal: f32,
    pub dominance: f32,
}

impl PadState {
    pub const ZERO: PadState = PadState { pleasure: 0.0, arousal: 0.0, dominance: 0.0 };

    pub fn new(pleasure: f32, arousal: f32, dominance: f32) -> Self {
        Self { pleasure, arousal, dominance }.clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            pleasure: self.pleasure.clamp(-1.0, 1.0),
            arousal: self.arousal.clamp(-1.0, 1.0),
            dominance: self.dominance.clamp(-1.0, 1.0),
        }
    }

    pub fn add(self, delta: PadState) -> Self {
        PadState {
            pleasure: self.pleasure + delta.pleasure,
            arousal: self.arousal + delta.arousal,
            dominance: self.dominance + delta.dominance,
        }
        .clamped()
    }

    /// Maps the PAD sign octant to one of 8 basic emotions (§11), grounded
    /// on `PADState.to_emotion_octant`.
    pub fn emotion_label(&self) -> &'static str {
        match (self.pleasure > 0.0, self.arousal > 0.0, self.dominance > 0.0) {
            (true, true, true) => "exuberant",
            (true, true, false) => "bored",
            (true, false, true) => "relaxed",
            (true, false, false) => "sleepy",
            (false, true, true) => "anxious",
            (false, true, false) => "stressed",
            (false, false, true) => "calm",
            (false, false, false) => "depressed",
        }
    }
}

/// Current + baseline PAD for a user, with the current state's derived
/// label (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    pub current: PadState,
    pub baseline: PadState,
    pub updated_at: DateTime<Utc>,
}

impl EmotionalState {
    pub fn new(current: PadState, baseline: PadState, updated_at: DateTime<Utc>) -> Self {
        Self { current, baseline, updated_at }
    }

    pub fn label(&self) -> &'static str {
        self.current.emotion_label()
    }

    /// Nightly baseline drift (§11): `baseline += (mean(recent_current) -
    /// baseline) * rate`, applied only when at least 5 samples are
    /// available in the window, clamped back into range. `rate` is expected
    /// in [0.0, 0.1] (default 0.01).
    pub fn drift_baseline(baseline: PadState, recent_current_samples: &[PadState], rate: f32) -> Option<PadState> {
        if recent_current_samples.len() < 5 {
            return None;
        }
        let n = recent_current_samples.len() as f32;
        let sum = recent_current_samples.iter().fold(PadState::ZERO, |acc, sample| PadState {
            pleasure: acc.pleasure + sample.pleasure,
            arousal: acc.arousal + sample.arousal,
            dominance: acc.dominance + sample.dominance,
        });
        let mean = PadState { pleasure: sum.pleasure / n, arousal: sum.arousal / n, dominance: sum.dominance / n };

        Some(
            PadState {
                pleasure: baseline.pleasure + (mean.pleasure - baseline.pleasure) * rate,
                arousal: baseline.arousal + (mean.arousal - baseline.arousal) * rate,
                dominance: baseline.dominance + (mean.dominance - baseline.dominance) * rate,
            }
            .clamped(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octant_mapping_covers_all_eight_signs() {
        assert_eq!(PadState::new(0.5, 0.5, 0.5).emotion_label(), "exuberant");
        assert_eq!(PadState::new(0.5, 0.5, -0.5).emotion_label(), "bored");
        assert_eq!(PadState::new(0.5, -0.5, 0.5).emotion_label(), "relaxed");
        assert_eq!(PadState::new(0.5, -0.5, -0.5).emotion_label(), "sleepy");
        assert_eq!(PadState::new(-0.5, 0.5, 0.5).emotion_label(), "anxious");
        assert_eq!(PadState::new(-0.5, 0.5, -0.5).emotion_label(), "stressed");
        assert_eq!(PadState::new(-0.5, -0.5, 0.5).emotion_label(), "calm");
        assert_eq!(PadState::new(-0.5, -0.5, -0.5).emotion_label(), "depressed");
    }

    #[test]
    fn add_clamps_to_valid_range() {
        let state = PadState::new(0.9, 0.0, 0.0);
        let result = state.add(PadState::new(0.5, 0.0, 0.0));
        assert_eq!(result.pleasure, 1.0);
    }

    #[test]
    fn baseline_drift_requires_five_samples() {
        let samples = vec![PadState::new(0.5, 0.0, 0.0); 4];
        assert!(EmotionalState::drift_baseline(PadState::ZERO, &samples, 0.01).is_none());
    }

    #[test]
    fn baseline_drift_moves_toward_recent_mean() {
        let samples = vec![PadState::new(1.0, 0.0, 0.0); 5];
        let drifted = EmotionalState::drift_baseline(PadState::ZERO, &samples, 0.1).unwrap();
        assert!((drifted.pleasure - 0.1).abs() < 1e-6);
    }
}
