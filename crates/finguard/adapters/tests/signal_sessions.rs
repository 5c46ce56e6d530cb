//! Full sessions driven by the in-process signal service

use std::sync::Arc;

use finguard_adapters::{AlwaysFailService, SignalCapabilityService};
use finguard_pipeline::{ErrorClass, FinalDecision, FraudVerdict, Orchestrator, PipelineConfig};
use serde_json::{json, Value};

fn orchestrator() -> Orchestrator {
    Orchestrator::builder(Arc::new(SignalCapabilityService::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_regular_transfer_is_approved() {
    let report = orchestrator()
        .run("Regular bank transfer", "text", "COMMAND", Value::Null)
        .await
        .unwrap();

    assert_eq!(report.final_decision, FinalDecision::SafeApproved);
    assert_eq!(report.fraud().unwrap().verdict, FraudVerdict::Safe);
    assert!(report.risk().is_none());
}

#[tokio::test]
async fn test_pinned_signals_block_immediately() {
    let metadata = json!({ "deepfake_confidence": 0.85, "anomaly_count": 6, "risk_score": 85 });
    let report = orchestrator()
        .run("Wire request from CEO video call", "video", "COMMAND", metadata)
        .await
        .unwrap();

    assert_eq!(report.fraud().unwrap().verdict, FraudVerdict::Fraud);
    assert_eq!(report.risk().unwrap().risk_score, 85);
    assert!(report.compliance().is_some());
    assert_eq!(report.final_decision, FinalDecision::BlockImmediately);
}

#[tokio::test]
async fn test_pinned_signals_need_review() {
    let metadata = json!({ "deepfake_confidence": 0.6, "anomaly_count": 0, "risk_score": 65 });
    let report = orchestrator()
        .run("Invoice payment", "document", "COMMAND", metadata)
        .await
        .unwrap();

    assert_eq!(report.fraud().unwrap().verdict, FraudVerdict::CheckRequired);
    assert!(report.compliance().is_none());
    assert_eq!(report.final_decision, FinalDecision::RequireManualReview);
}

#[tokio::test]
async fn test_keyword_scam_is_escalated() {
    let report = orchestrator()
        .run(
            "Congratulations! Act now: transfer your deposit to this bitcoin wallet",
            "text",
            "COMMAND",
            Value::Null,
        )
        .await
        .unwrap();

    let fraud = report.fraud().unwrap();
    assert_eq!(fraud.verdict, FraudVerdict::Fraud);
    assert!(fraud.escalate_to_risk);
    assert!(report.risk().is_some());
}

#[tokio::test]
async fn test_unavailable_service_degrades_every_stage() {
    let mut config = PipelineConfig::default();
    config.service.retry_backoff_ms = 1;
    let report = Orchestrator::builder(Arc::new(AlwaysFailService::new("gateway down")))
        .config(config)
        .build()
        .unwrap()
        .run("Regular bank transfer", "text", "COMMAND", Value::Null)
        .await
        .unwrap();

    assert!(report.fraud().unwrap().error.is_some());
    assert!(report.memory().unwrap().error.is_some());
    assert!(report
        .errors
        .iter()
        .all(|e| e.error == ErrorClass::ExternalService));
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.final_decision, FinalDecision::RequireManualReview);
}
