//! Capability service adapters for FinGuard.
//!
//! - [`SignalCapabilityService`]: deterministic in-process analysis, for local
//!   runs and demos.
//! - [`GatewayCapabilityService`]: forwards invocations to an HTTP gateway.
//! - [`AlwaysFailService`]: fails every call, for chaos testing.

#![deny(unsafe_code)]

pub mod error;
pub mod gateway;
pub mod signal;

use async_trait::async_trait;
use finguard_capability::{CapabilityService, ServiceFailure};
use finguard_policy::ActionKey;
use serde_json::Value;

pub use error::{AdapterError, AdapterResult};
pub use gateway::GatewayCapabilityService;
pub use signal::SignalCapabilityService;

/// Deterministic failing service.
#[derive(Debug, Clone)]
pub struct AlwaysFailService {
    reason: String,
    retryable: bool,
}

impl AlwaysFailService {
    /// Fails with a retryable remote error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Fails with a rejection the gate will not retry.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

#[async_trait]
impl CapabilityService for AlwaysFailService {
    fn name(&self) -> &str {
        "always-fail"
    }

    async fn call(&self, action: &ActionKey, _params: &Value) -> Result<Value, ServiceFailure> {
        Err(ServiceFailure {
            message: format!("{action}: {}", self.reason),
            retryable: self.retryable,
        })
    }
}
