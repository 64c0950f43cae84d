use serde::{Deserialize, Serialize};

/// Closed set of threat classifications the injection detector can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    None,
    RoleManipulation,
    SystemQuery,
    InjectionAttempt,
    /// Assigned when the detector itself timed out or returned unparsable
    /// output — the fail-secure classification, never "none".
    DetectionTimeout,
}

impl ThreatType {
    pub fn is_threat(self) -> bool {
        !matches!(self, ThreatType::None)
    }
}
