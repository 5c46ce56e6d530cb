use std::collections::BTreeSet;
use std::fmt;

use finguard_policy::ActionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CapabilityError;

/// One declared action of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    pub namespace: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub description: String,
}

impl Step {
    pub fn new(namespace: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            namespace: namespace.into(),
            params: Value::Object(Default::default()),
            description: String::new(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn key(&self) -> Result<ActionKey, CapabilityError> {
        ActionKey::new(&self.namespace, &self.action)
            .map_err(|e| CapabilityError::PlanValidation(e.to_string()))
    }
}

/// Goal plus ordered steps, captured once per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Check structure and return the declared action keys in step order.
    pub fn validate(&self) -> Result<Vec<ActionKey>, CapabilityError> {
        if self.goal.trim().is_empty() {
            return Err(CapabilityError::PlanValidation("plan goal is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(CapabilityError::PlanValidation("plan has no steps".into()));
        }

        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                step.key().map_err(|e| {
                    CapabilityError::PlanValidation(format!("step {}: {}", idx + 1, e))
                })
            })
            .collect()
    }

    pub fn declared_actions(&self) -> Result<BTreeSet<ActionKey>, CapabilityError> {
        Ok(self.validate()?.into_iter().collect())
    }

    /// BLAKE3 over the canonical JSON encoding.
    pub fn fingerprint(&self) -> Result<PlanFingerprint, CapabilityError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| CapabilityError::PlanValidation(format!("plan encoding: {e}")))?;
        Ok(PlanFingerprint(blake3::hash(&bytes).to_hex().to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanFingerprint(pub String);

impl PlanFingerprint {
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for PlanFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
