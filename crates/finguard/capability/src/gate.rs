use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use finguard_policy::{authorize, ActionKey, Authorization};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::CapabilityError;
use crate::service::{CapabilityService, ServiceCallPolicy};
use crate::token::{AgentId, CapabilityToken};

/// Verifies a single action against a token and dispatches it.
///
/// One gate per session: per-token usage counters for rate constraints live
/// here and are never shared across sessions.
pub struct InvocationGate {
    service: Arc<dyn CapabilityService>,
    call_policy: ServiceCallPolicy,
    usage: HashMap<String, u32>,
}

impl InvocationGate {
    pub fn new(service: Arc<dyn CapabilityService>, call_policy: ServiceCallPolicy) -> Self {
        Self {
            service,
            call_policy,
            usage: HashMap::new(),
        }
    }

    pub fn call_policy(&self) -> &ServiceCallPolicy {
        &self.call_policy
    }

    /// Successful dispatches recorded against `token`.
    pub fn usage(&self, token: &CapabilityToken) -> u32 {
        self.usage.get(token.token_id()).copied().unwrap_or(0)
    }

    /// Run every pre-dispatch check without calling the service.
    ///
    /// Order: expiry, holder binding, plan declaration, live policy, token
    /// scope, policy constraints.
    pub fn check(
        &self,
        caller: &AgentId,
        token: &CapabilityToken,
        action: &ActionKey,
        at: DateTime<Utc>,
    ) -> Result<(), CapabilityError> {
        token.ensure_unexpired(at)?;

        if token.holder() != caller {
            return Err(CapabilityError::verification(
                action,
                format!("token held by '{}', presented by '{}'", token.holder(), caller),
            ));
        }

        if !token.plan_actions().contains(action) {
            return Err(CapabilityError::verification(action, "not declared in plan"));
        }

        if let Authorization::Denied(reason) = authorize(token.policy(), action) {
            return Err(CapabilityError::policy_violation(action, reason));
        }

        if !token.allowed_actions().contains(action) {
            return Err(CapabilityError::verification(action, "outside token scope"));
        }

        token
            .policy()
            .constraints()
            .check(self.usage(token), at)
            .map_err(|violation| CapabilityError::policy_violation(action, violation))
    }

    pub async fn invoke(
        &mut self,
        caller: &AgentId,
        token: &CapabilityToken,
        action: &ActionKey,
        params: &Value,
    ) -> Result<Value, CapabilityError> {
        if let Err(err) = self.check(caller, token, action, Utc::now()) {
            warn!(
                caller = %caller,
                token_id = token.token_id(),
                action = %action,
                error = %err,
                "Invocation rejected"
            );
            return Err(err);
        }

        let result = self.dispatch(action, params).await?;
        *self.usage.entry(token.token_id().to_string()).or_insert(0) += 1;

        info!(caller = %caller, action = %action, "Invocation executed");
        Ok(result)
    }

    async fn dispatch(&self, action: &ActionKey, params: &Value) -> Result<Value, CapabilityError> {
        let max_attempts = self.call_policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                service = self.service.name(),
                action = %action,
                attempt,
                "Dispatching to capability service"
            );

            let (message, retryable) = match tokio::time::timeout(
                self.call_policy.timeout,
                self.service.call(action, params),
            )
            .await
            {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(failure)) => (failure.message, failure.retryable),
                Err(_) => (
                    format!("timed out after {}ms", self.call_policy.timeout.as_millis()),
                    true,
                ),
            };

            if !retryable || attempt >= max_attempts {
                warn!(
                    service = self.service.name(),
                    action = %action,
                    attempts = attempt,
                    error = %message,
                    "Capability service call failed"
                );
                return Err(CapabilityError::ExternalService {
                    action: action.to_string(),
                    attempts: attempt,
                    message,
                });
            }

            warn!(
                action = %action,
                error = %message,
                backoff_ms = self.call_policy.retry_backoff.as_millis() as u64,
                "Capability service call failed, retrying"
            );
            tokio::time::sleep(self.call_policy.retry_backoff).await;
        }
    }
}
