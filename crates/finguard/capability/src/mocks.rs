use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use finguard_policy::ActionKey;
use serde_json::{json, Value};

use crate::service::{CapabilityService, ServiceFailure};

#[derive(Debug, Clone)]
enum Script {
    Respond(Value),
    Fail(String),
    Reject(String),
    FailTimes { remaining: u32, then: Value },
    Delay { delay: Duration, then: Value },
}

/// Scripted capability service for testing.
///
/// Unscripted actions answer with an empty JSON object. Every call is recorded.
#[derive(Debug, Default)]
pub struct MockCapabilityService {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockCapabilityService {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, action: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(action), script);
        self
    }

    pub fn respond(self, action: &str, value: Value) -> Self {
        self.script(action, Script::Respond(value))
    }

    /// Retryable failure on every call.
    pub fn fail(self, action: &str, message: impl Into<String>) -> Self {
        self.script(action, Script::Fail(message.into()))
    }

    /// Non-retryable failure on every call.
    pub fn reject(self, action: &str, message: impl Into<String>) -> Self {
        self.script(action, Script::Reject(message.into()))
    }

    /// Fail the first `times` calls, then respond with `then`.
    pub fn fail_times(self, action: &str, times: u32, then: Value) -> Self {
        self.script(
            action,
            Script::FailTimes {
                remaining: times,
                then,
            },
        )
    }

    pub fn delay(self, action: &str, delay: Duration, then: Value) -> Self {
        self.script(action, Script::Delay { delay, then })
    }

    pub fn call_count(&self, action: &str) -> usize {
        let action = normalize(action);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(a, _)| *a == action)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Params of every recorded call to `action`, oldest first.
    pub fn params_for(&self, action: &str) -> Vec<Value> {
        let action = normalize(action);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(a, _)| *a == action)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

fn normalize(action: &str) -> String {
    action.trim().to_ascii_lowercase()
}

#[async_trait]
impl CapabilityService for MockCapabilityService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, action: &ActionKey, params: &Value) -> Result<Value, ServiceFailure> {
        let name = action.to_string();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.clone(), params.clone()));

        let step = {
            let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
            match scripts.get_mut(&name) {
                None => Script::Respond(json!({})),
                Some(Script::FailTimes { remaining, then }) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        Script::Fail(format!("scripted failure for {name}"))
                    } else {
                        Script::Respond(then.clone())
                    }
                }
                Some(other) => other.clone(),
            }
        };

        match step {
            Script::Respond(value) => Ok(value),
            Script::Fail(message) => Err(ServiceFailure::remote(message)),
            Script::Reject(message) => Err(ServiceFailure::rejected(message)),
            Script::Delay { delay, then } => {
                tokio::time::sleep(delay).await;
                Ok(then)
            }
            Script::FailTimes { then, .. } => Ok(then),
        }
    }
}
