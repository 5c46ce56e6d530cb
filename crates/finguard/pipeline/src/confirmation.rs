//! ASK-mode confirmation points.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::FinalDecision;
use crate::types::{SessionId, StageKind};

/// An escalation awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationProposal {
    pub session_id: SessionId,
    pub from: StageKind,
    pub to: StageKind,
    pub scope: Vec<String>,
    /// The proposing stage's report.
    pub report: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum EscalationVerdict {
    Proceed,
    Block { rationale: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FinalVerdict {
    Accept,
    Override {
        decision: FinalDecision,
        rationale: String,
    },
}

/// External caller consulted before escalations and the final decision in
/// ASK mode. Never consulted in COMMAND mode.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm_escalation(&self, proposal: &EscalationProposal) -> EscalationVerdict;

    async fn confirm_final(&self, session_id: &SessionId, proposed: FinalDecision) -> FinalVerdict;
}

/// Approves every proposal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm_escalation(&self, _proposal: &EscalationProposal) -> EscalationVerdict {
        EscalationVerdict::Proceed
    }

    async fn confirm_final(&self, _session_id: &SessionId, _proposed: FinalDecision) -> FinalVerdict {
        FinalVerdict::Accept
    }
}

/// Answers every confirmation point with fixed verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedConfirmation {
    pub escalation: EscalationVerdict,
    pub final_decision: FinalVerdict,
}

impl FixedConfirmation {
    pub fn block_escalations(rationale: impl Into<String>) -> Self {
        Self {
            escalation: EscalationVerdict::Block {
                rationale: rationale.into(),
            },
            final_decision: FinalVerdict::Accept,
        }
    }

    pub fn override_final(decision: FinalDecision, rationale: impl Into<String>) -> Self {
        Self {
            escalation: EscalationVerdict::Proceed,
            final_decision: FinalVerdict::Override {
                decision,
                rationale: rationale.into(),
            },
        }
    }
}

#[async_trait]
impl ConfirmationHandler for FixedConfirmation {
    async fn confirm_escalation(&self, _proposal: &EscalationProposal) -> EscalationVerdict {
        self.escalation.clone()
    }

    async fn confirm_final(&self, _session_id: &SessionId, _proposed: FinalDecision) -> FinalVerdict {
        self.final_decision.clone()
    }
}
