use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{AuditEntry, BlockedAction, ErrorRecord};
use crate::types::{ExecutionMode, MediaType, SessionId, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudVerdict {
    Safe,
    Fraud,
    CheckRequired,
}

impl FraudVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Fraud => "FRAUD",
            Self::CheckRequired => "CHECK_REQUIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudReport {
    pub verdict: FraudVerdict,
    pub confidence: f64,
    pub anomaly_count: u32,
    #[serde(default)]
    pub detection: Value,
    #[serde(default)]
    pub anomalies: Value,
    pub escalate_to_risk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub fraud_verdict: Option<FraudVerdict>,
    pub risk_score: u8,
    pub severity: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub escalate_to_compliance: bool,
    pub block_immediately: bool,
    /// Results of actions invoked under the received delegation.
    #[serde(default)]
    pub evidence: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub aml_kyc_status: String,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub required_actions: Vec<String>,
    pub compliance_approved: bool,
    #[serde(default)]
    pub evidence: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsolidationStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub session_id: SessionId,
    pub stages_consolidated: Vec<String>,
    pub total_audit_entries: usize,
    pub blocked_actions_count: usize,
    pub errors_count: usize,
    pub consolidation_status: ConsolidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stage-specific decision payload. Immutable once appended to the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    Fraud(FraudReport),
    Risk(RiskReport),
    Compliance(ComplianceReport),
    MemoryConsolidation(MemoryReport),
}

impl StageReport {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Fraud(_) => StageKind::Fraud,
            Self::Risk(_) => StageKind::Risk,
            Self::Compliance(_) => StageKind::Compliance,
            Self::MemoryConsolidation(_) => StageKind::MemoryConsolidation,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Fraud(r) => r.error.as_deref(),
            Self::Risk(r) => r.error.as_deref(),
            Self::Compliance(r) => r.error.as_deref(),
            Self::MemoryConsolidation(r) => r.error.as_deref(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error().is_some()
    }

    pub(crate) fn set_escalated(&mut self, escalated: bool) {
        match self {
            Self::Fraud(r) => r.escalate_to_risk = escalated,
            Self::Risk(r) => r.escalate_to_compliance = escalated,
            Self::Compliance(_) | Self::MemoryConsolidation(_) => {}
        }
    }

    pub fn as_fraud(&self) -> Option<&FraudReport> {
        match self {
            Self::Fraud(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_risk(&self) -> Option<&RiskReport> {
        match self {
            Self::Risk(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_compliance(&self) -> Option<&ComplianceReport> {
        match self {
            Self::Compliance(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryReport> {
        match self {
            Self::MemoryConsolidation(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalDecision {
    BlockImmediately,
    EscalateToAuthorities,
    FraudDetectedMonitor,
    RequireManualReview,
    SafeApproved,
}

impl FinalDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockImmediately => "BLOCK_IMMEDIATELY",
            Self::EscalateToAuthorities => "ESCALATE_TO_AUTHORITIES",
            Self::FraudDetectedMonitor => "FRAUD_DETECTED_MONITOR",
            Self::RequireManualReview => "REQUIRE_MANUAL_REVIEW",
            Self::SafeApproved => "SAFE_APPROVED",
        }
    }
}

impl std::fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a caller gets back from one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub mode: ExecutionMode,
    pub media_type: MediaType,
    pub final_decision: FinalDecision,
    /// Decision proposed by the rules when an ASK-mode caller replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden_from: Option<FinalDecision>,
    pub stage_reports: BTreeMap<String, StageReport>,
    pub audit_trail: Vec<AuditEntry>,
    pub blocked_actions: Vec<BlockedAction>,
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn report(&self, kind: StageKind) -> Option<&StageReport> {
        self.stage_reports.get(kind.name())
    }

    pub fn fraud(&self) -> Option<&FraudReport> {
        self.report(StageKind::Fraud).and_then(StageReport::as_fraud)
    }

    pub fn risk(&self) -> Option<&RiskReport> {
        self.report(StageKind::Risk).and_then(StageReport::as_risk)
    }

    pub fn compliance(&self) -> Option<&ComplianceReport> {
        self.report(StageKind::Compliance)
            .and_then(StageReport::as_compliance)
    }

    pub fn memory(&self) -> Option<&MemoryReport> {
        self.report(StageKind::MemoryConsolidation)
            .and_then(StageReport::as_memory)
    }

    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}
