use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authorization and invocation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Authorization failed for '{holder}': {reason}")]
    Authorization { holder: String, reason: String },

    #[error("Token {token_id} expired at {expired_at}")]
    TokenExpired {
        token_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("Verification failed for '{action}': {reason}")]
    Verification { action: String, reason: String },

    #[error("Policy violation for '{action}': {reason}")]
    PolicyViolation { action: String, reason: String },

    #[error("Delegation rejected: {0}")]
    Delegation(String),

    #[error("External service call '{action}' failed after {attempts} attempt(s): {message}")]
    ExternalService {
        action: String,
        attempts: u32,
        message: String,
    },
}

impl CapabilityError {
    pub fn verification(action: impl ToString, reason: impl Into<String>) -> Self {
        Self::Verification {
            action: action.to_string(),
            reason: reason.into(),
        }
    }

    pub fn policy_violation(action: impl ToString, reason: impl ToString) -> Self {
        Self::PolicyViolation {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlanValidation(_) => ErrorKind::PlanValidation,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::TokenExpired { .. } => ErrorKind::TokenExpired,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Self::Delegation(_) => ErrorKind::Delegation,
            Self::ExternalService { .. } => ErrorKind::ExternalService,
        }
    }

    /// Rejections that block a single action without aborting the stage.
    pub fn is_action_local(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired { .. } | Self::Verification { .. } | Self::PolicyViolation { .. }
        )
    }
}

/// Stable classification of [`CapabilityError`] for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PlanValidation,
    Authorization,
    TokenExpired,
    Verification,
    PolicyViolation,
    Delegation,
    ExternalService,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PlanValidation => "PlanValidationError",
            Self::Authorization => "AuthorizationError",
            Self::TokenExpired => "TokenExpiredError",
            Self::Verification => "VerificationError",
            Self::PolicyViolation => "PolicyViolationError",
            Self::Delegation => "DelegationError",
            Self::ExternalService => "ExternalServiceError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
