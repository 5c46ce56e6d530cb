use finguard_capability::{CapabilityError, ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-level errors.
///
/// None of these escape [`crate::Orchestrator::run`]; they are recorded in the
/// session's error list instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("stage order violation: expected '{expected}', got '{actual}'")]
    StageOrder { expected: String, actual: String },

    #[error("Invalid media type '{0}' (expected text, image, audio, video or document)")]
    InvalidMediaType(String),

    #[error("Invalid execution mode '{0}' (expected ASK or COMMAND)")]
    InvalidMode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session cancelled during {0}")]
    Cancelled(String),
}

impl PipelineError {
    pub fn stage_order(expected: &str, actual: &str) -> Self {
        Self::StageOrder {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Capability(err) => err.kind().into(),
            Self::StageOrder { .. } => ErrorClass::StageOrder,
            Self::InvalidMediaType(_) | Self::InvalidMode(_) | Self::Config(_) => {
                ErrorClass::Configuration
            }
            Self::Cancelled(_) => ErrorClass::Cancelled,
        }
    }
}

/// Classification stored in error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    PlanValidation,
    Authorization,
    TokenExpired,
    Verification,
    PolicyViolation,
    Delegation,
    ExternalService,
    StageOrder,
    Configuration,
    Cancelled,
}

impl From<ErrorKind> for ErrorClass {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::PlanValidation => Self::PlanValidation,
            ErrorKind::Authorization => Self::Authorization,
            ErrorKind::TokenExpired => Self::TokenExpired,
            ErrorKind::Verification => Self::Verification,
            ErrorKind::PolicyViolation => Self::PolicyViolation,
            ErrorKind::Delegation => Self::Delegation,
            ErrorKind::ExternalService => Self::ExternalService,
        }
    }
}
