use std::time::Duration;

use async_trait::async_trait;
use finguard_policy::ActionKey;
use serde_json::Value;
use thiserror::Error;

/// External executor for `namespace/action` invocations.
#[async_trait]
pub trait CapabilityService: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn call(&self, action: &ActionKey, params: &Value) -> Result<Value, ServiceFailure>;
}

/// Failure reported by a capability service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceFailure {
    pub message: String,
    /// Whether a second attempt may succeed. Rejections are never retried.
    pub retryable: bool,
}

impl ServiceFailure {
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Timeout and retry settings for service dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCallPolicy {
    pub timeout: Duration,
    /// Allow one retry after a timeout or retryable failure.
    pub retry_once: bool,
    pub retry_backoff: Duration,
}

impl Default for ServiceCallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_once: true,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl ServiceCallPolicy {
    pub fn max_attempts(&self) -> u32 {
        if self.retry_once {
            2
        } else {
            1
        }
    }
}
