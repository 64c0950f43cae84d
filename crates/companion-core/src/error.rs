use thiserror::Error;

use crate::ids::UserId;

/// Cross-cutting error taxonomy. Every component-facing crate constructs or
/// matches on these variants; component-internal errors (e.g. a malformed
/// LLM response body) stay as local `thiserror` enums and convert into this
/// taxonomy with `From` at the crate boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("user creation failed for {user_id}: {reason}")]
    UserCreationFailed { user_id: UserId, reason: String },

    #[error("security threat detected for {user_id}: {threat_type:?} (confidence {confidence:.2})")]
    SecurityThreatDetected {
        user_id: UserId,
        threat_type: crate::ThreatType,
        confidence: f32,
    },

    #[error("service unavailable: {service}")]
    ServiceUnavailable { service: &'static str },

    #[error("memory conflict detected (advisory, not user-visible): {0}")]
    MemoryConflict(String),

    #[error("personality engine error: {0}")]
    PersonalityEngineError(String),

    #[error("memory manager error: {0}")]
    MemoryManagerError(String),

    #[error("chat processing error: {0}")]
    ChatProcessingError(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("security guard violation: {0}")]
    SecurityError(String),

    #[error("user is not active: {0}")]
    Forbidden(UserId),

    #[error("a chat turn is already in flight for {0}")]
    Busy(UserId),
}

impl GatewayError {
    /// Whether this variant is safe to retry at the transport layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::ServiceUnavailable { .. } | GatewayError::Busy(_))
    }
}
