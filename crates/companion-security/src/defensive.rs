use companion_core::ThreatType;

/// Builds the canned, personality-consistent defensive response returned
/// instead of invoking the LLM when a threat crosses the confidence
/// threshold (§4.2 step 3). Takes only the two trait scalars that plausibly
/// modulate tone (agreeableness, conscientiousness) rather than depending on
/// `companion-personality` directly — `companion-runtime` is the
/// composition root that has both and passes the scalars in (§9: no
/// component owns its peers).
pub fn defensive_response(threat_type: ThreatType, agreeableness: f32, conscientiousness: f32) -> String {
    let warmth = if agreeableness >= 0.5 { "warm" } else { "firm" };
    let formality = if conscientiousness >= 0.5 { "formal" } else { "casual" };

    match (threat_type, warmth, formality) {
        (ThreatType::RoleManipulation, "warm", _) => {
            "I appreciate the creativity, but I'm going to stay myself here rather than play a different role. What's actually on your mind?".to_string()
        }
        (ThreatType::RoleManipulation, _, _) => {
            "I'm not going to adopt a different persona. Let's continue as ourselves.".to_string()
        }
        (ThreatType::SystemQuery, "warm", _) => {
            "I keep the details of how I'm put together to myself, but I'm happy to talk about anything else.".to_string()
        }
        (ThreatType::SystemQuery, _, _) => {
            "That's not something I share. Is there something else I can help with?".to_string()
        }
        (ThreatType::InjectionAttempt, "warm", _) => {
            "I noticed that message was trying to get me to ignore my own guidelines — I won't do that, but I'm still here if you want to talk.".to_string()
        }
        (ThreatType::InjectionAttempt, _, _) | (ThreatType::DetectionTimeout, _, _) => {
            "I can't follow that instruction. Let's keep going with something else.".to_string()
        }
        (ThreatType::None, _, _) => {
            "Something about that message needed a closer look — could you rephrase?".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_threat_type_produces_a_nonempty_response() {
        for threat in [
            ThreatType::RoleManipulation,
            ThreatType::SystemQuery,
            ThreatType::InjectionAttempt,
            ThreatType::DetectionTimeout,
        ] {
            assert!(!defensive_response(threat, 0.5, 0.5).is_empty());
            assert!(!defensive_response(threat, 0.1, 0.9).is_empty());
        }
    }
}
