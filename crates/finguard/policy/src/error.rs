use thiserror::Error;

/// Errors raised while building action keys and policies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Invalid action key '{key}': {reason}")]
    InvalidActionKey { key: String, reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),
}

impl PolicyError {
    pub fn action_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidActionKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
