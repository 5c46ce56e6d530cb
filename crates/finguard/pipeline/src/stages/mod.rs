//! Stage agents.
//!
//! Every stage implements [`Stage`]: it declares a plan, turns invocation
//! results into a report, and names the scope it hands to its successor.
//! Execution (token issue, invocation, delegation) is shared and lives in
//! [`crate::runner`].

use std::collections::{BTreeMap, BTreeSet};

use finguard_capability::{AgentId, Plan};
use finguard_policy::{ActionKey, Policy};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::report::StageReport;
use crate::types::{SessionRequest, StageKind};

mod compliance;
mod fraud;
mod memory;
mod risk;

pub use compliance::ComplianceStage;
pub use fraud::FraudStage;
pub use memory::MemoryConsolidationStage;
pub use risk::RiskStage;

/// Identity and static policy of a stage agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub id: AgentId,
    pub policy: Policy,
}

impl AgentProfile {
    /// Own namespace allowed, every other stage namespace denied.
    pub fn isolated(kind: StageKind) -> Self {
        let denied: Vec<&str> = StageKind::ALL
            .iter()
            .filter(|other| **other != kind)
            .map(|other| other.name())
            .collect();
        Self {
            id: AgentId::new(kind.name()),
            policy: Policy::namespace_scoped(kind.name(), kind.name(), &denied),
        }
    }
}

/// Invocation outputs gathered for one stage run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResults {
    /// Results of the stage's own plan steps.
    pub outputs: BTreeMap<ActionKey, Value>,
    /// Results of actions invoked under a received delegation.
    pub delegated: BTreeMap<ActionKey, Value>,
    pub blocked: Vec<ActionKey>,
}

impl StageResults {
    pub fn output(&self, namespace: &str, action: &str) -> Option<&Value> {
        let key = ActionKey::new(namespace, action).ok()?;
        self.outputs.get(&key)
    }

    pub fn delegated_evidence(&self) -> BTreeMap<String, Value> {
        self.delegated
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// One pipeline stage.
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn profile(&self) -> &AgentProfile;

    fn build_plan(&self, request: &SessionRequest, context: &ExecutionContext) -> Plan;

    fn decide(&self, results: &StageResults, context: &ExecutionContext) -> StageReport;

    /// Scope to delegate to the successor, or `None` to stop escalating.
    fn next_allowed_actions(&self, report: &StageReport) -> Option<BTreeSet<ActionKey>>;

    /// Report produced when the stage cannot complete.
    fn degraded(&self, error: &str, context: &ExecutionContext) -> StageReport;
}

pub(crate) fn number(value: Option<&Value>, field: &str) -> Option<f64> {
    value.and_then(|v| v.get(field)).and_then(Value::as_f64)
}

pub(crate) fn text(value: Option<&Value>, field: &str) -> Option<String> {
    value
        .and_then(|v| v.get(field))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn strings(value: Option<&Value>, field: &str) -> Vec<String> {
    value
        .and_then(|v| v.get(field))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn scope(kind: StageKind, actions: &[&str]) -> BTreeSet<ActionKey> {
    actions
        .iter()
        .filter_map(|action| ActionKey::new(kind.name(), action).ok())
        .collect()
}
