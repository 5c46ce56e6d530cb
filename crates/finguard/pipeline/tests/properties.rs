//! Session-level properties over arbitrary service signals.

use std::sync::Arc;

use finguard_capability::mocks::MockCapabilityService;
use finguard_pipeline::{
    ExecutionMode, FinalDecision, FraudVerdict, MediaType, Orchestrator, SessionReport,
    SessionRequest,
};
use proptest::prelude::*;
use serde_json::json;

fn run_session(confidence: f64, anomalies: u32, risk_score: u8, violations: bool) -> SessionReport {
    let regulations = if violations {
        json!({ "violations": ["KYC incomplete"] })
    } else {
        json!({ "violations": [] })
    };
    let service = MockCapabilityService::new()
        .respond("fraud_agent/detect_deepfakes", json!({ "confidence": confidence }))
        .respond("fraud_agent/analyze_anomalies", json!({ "anomaly_count": anomalies }))
        .respond("risk_agent/calculate_risk_score", json!({ "risk_score": risk_score }))
        .respond("compliance_agent/validate_regulations", regulations);
    let orchestrator = Orchestrator::builder(Arc::new(service)).build().unwrap();

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(orchestrator.run_request(SessionRequest::new(
            "generated",
            MediaType::Text,
            ExecutionMode::Command,
        )))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn property_memory_always_closes_the_session(
        confidence in 0.0f64..=1.0,
        anomalies in 0u32..10,
        risk_score in 0u8..=100,
        violations in any::<bool>(),
    ) {
        let report = run_session(confidence, anomalies, risk_score, violations);
        prop_assert!(report.memory().is_some());
        prop_assert_eq!(report.audit_trail.last().map(|e| e.stage.as_str()), Some("memory_agent"));
    }

    #[test]
    fn property_escalation_follows_stage_outcomes(
        confidence in 0.0f64..=1.0,
        anomalies in 0u32..10,
        risk_score in 0u8..=100,
        violations in any::<bool>(),
    ) {
        let report = run_session(confidence, anomalies, risk_score, violations);
        let fraud = report.fraud().unwrap();
        prop_assert_eq!(report.risk().is_some(), fraud.verdict != FraudVerdict::Safe);
        if report.risk().is_some() {
            prop_assert_eq!(report.compliance().is_some(), risk_score > 70);
        } else {
            prop_assert!(report.compliance().is_none());
        }
    }

    #[test]
    fn property_block_iff_escalated_risk_above_threshold(
        confidence in 0.0f64..=1.0,
        anomalies in 0u32..10,
        risk_score in 0u8..=100,
        violations in any::<bool>(),
    ) {
        let report = run_session(confidence, anomalies, risk_score, violations);
        let blocked = report.risk().is_some_and(|r| r.risk_score > 80);
        prop_assert_eq!(report.final_decision == FinalDecision::BlockImmediately, blocked);
        if report.fraud().unwrap().verdict == FraudVerdict::Safe {
            prop_assert_eq!(report.final_decision, FinalDecision::SafeApproved);
        }
    }

    #[test]
    fn property_audit_sequence_is_dense(
        confidence in 0.0f64..=1.0,
        risk_score in 0u8..=100,
    ) {
        let report = run_session(confidence, 0, risk_score, false);
        for (i, entry) in report.audit_trail.iter().enumerate() {
            prop_assert_eq!(entry.sequence, i as u64 + 1);
        }
        prop_assert!(report.errors.is_empty());
    }
}
