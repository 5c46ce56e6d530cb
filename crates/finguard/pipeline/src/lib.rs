//! FinGuard Pipeline - sequential multi-stage authorization
//!
//! A session runs Fraud, then escalates to Risk and Compliance through
//! narrowed capability delegations, and always closes with
//! MemoryConsolidation. Every stage invocation is scoped by a plan-bound
//! [`finguard_capability::CapabilityToken`] and recorded in the session's
//! [`ExecutionContext`].
//!
//! ```text
//! input -> Fraud -(escalate)-> Risk -(escalate)-> Compliance
//!            \                  \                    \
//!             +------------------+--------------------+--> MemoryConsolidation
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod confirmation;
pub mod context;
pub mod decision;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod stages;
pub mod types;

pub use config::{FraudThresholds, PipelineConfig, RiskThresholds, ServiceConfig, TokenConfig};
pub use confirmation::{
    AutoApprove, ConfirmationHandler, EscalationProposal, EscalationVerdict, FinalVerdict,
    FixedConfirmation,
};
pub use context::{AuditEntry, AuditStatus, BlockedAction, ErrorRecord, ExecutionContext};
pub use decision::{DecisionInputs, DecisionRule, DecisionRules, EscalationRoutes, RuleCondition};
pub use error::{ErrorClass, PipelineError};
pub use flow::{StageMachine, StageState};
pub use orchestrator::{cancellation, CancelSignal, CancellationHandle, Orchestrator, OrchestratorBuilder};
pub use report::{
    ComplianceReport, ConsolidationStatus, FinalDecision, FraudReport, FraudVerdict, MemoryReport,
    RiskReport, SessionReport, StageReport,
};
pub use stages::{
    AgentProfile, ComplianceStage, FraudStage, MemoryConsolidationStage, RiskStage, Stage,
    StageResults,
};
pub use types::{ExecutionMode, MediaType, SessionId, SessionRequest, StageKind};
