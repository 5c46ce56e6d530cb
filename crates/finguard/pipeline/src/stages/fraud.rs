use std::collections::BTreeSet;

use finguard_capability::{Plan, Step};
use finguard_policy::ActionKey;
use serde_json::{json, Value};

use super::{number, scope, AgentProfile, Stage, StageResults};
use crate::config::FraudThresholds;
use crate::context::ExecutionContext;
use crate::report::{FraudReport, FraudVerdict, StageReport};
use crate::types::{SessionRequest, StageKind};

const DETECT_DEEPFAKES: &str = "detect_deepfakes";
const ANALYZE_ANOMALIES: &str = "analyze_anomalies";

/// First stage: deepfake confidence and anomaly count decide the verdict.
#[derive(Debug, Clone)]
pub struct FraudStage {
    profile: AgentProfile,
    thresholds: FraudThresholds,
}

impl FraudStage {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self {
            profile: AgentProfile::isolated(StageKind::Fraud),
            thresholds,
        }
    }

    pub fn classify(&self, confidence: f64, anomalies: u32) -> FraudVerdict {
        let t = &self.thresholds;
        if confidence > t.fraud_confidence || anomalies > t.fraud_anomalies {
            FraudVerdict::Fraud
        } else if confidence > t.review_confidence || anomalies > t.review_anomalies {
            FraudVerdict::CheckRequired
        } else {
            FraudVerdict::Safe
        }
    }
}

impl Default for FraudStage {
    fn default() -> Self {
        Self::new(FraudThresholds::default())
    }
}

fn anomaly_count(value: Option<&Value>) -> u32 {
    let Some(value) = value else {
        return 0;
    };
    if let Some(items) = value.get("anomalies").and_then(Value::as_array) {
        return items.len() as u32;
    }
    number(Some(value), "anomaly_count")
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(0)
}

impl Stage for FraudStage {
    fn kind(&self) -> StageKind {
        StageKind::Fraud
    }

    fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_plan(&self, request: &SessionRequest, context: &ExecutionContext) -> Plan {
        let params = json!({
            "session_id": context.session_id(),
            "input": request.input,
            "media_type": request.media_type,
            "metadata": request.metadata,
        });
        let ns = StageKind::Fraud.name();
        Plan::new(format!("Detect fraud in {} input", request.media_type))
            .step(
                Step::new(ns, DETECT_DEEPFAKES)
                    .with_params(params.clone())
                    .with_description("Score likelihood of synthetic or manipulated media"),
            )
            .step(
                Step::new(ns, ANALYZE_ANOMALIES)
                    .with_params(params)
                    .with_description("Count behavioural and content anomalies"),
            )
    }

    fn decide(&self, results: &StageResults, _context: &ExecutionContext) -> StageReport {
        let ns = StageKind::Fraud.name();
        let detection = results.output(ns, DETECT_DEEPFAKES);
        let anomalies = results.output(ns, ANALYZE_ANOMALIES);

        let confidence = number(detection, "confidence").unwrap_or(0.0).clamp(0.0, 1.0);
        let anomaly_count = anomaly_count(anomalies);

        StageReport::Fraud(FraudReport {
            verdict: self.classify(confidence, anomaly_count),
            confidence,
            anomaly_count,
            detection: detection.cloned().unwrap_or(Value::Null),
            anomalies: anomalies.cloned().unwrap_or(Value::Null),
            escalate_to_risk: false,
            error: None,
        })
    }

    fn next_allowed_actions(&self, report: &StageReport) -> Option<BTreeSet<ActionKey>> {
        match report.as_fraud()?.verdict {
            FraudVerdict::Fraud | FraudVerdict::CheckRequired => {
                Some(scope(StageKind::Fraud, &[DETECT_DEEPFAKES]))
            }
            FraudVerdict::Safe => None,
        }
    }

    fn degraded(&self, error: &str, _context: &ExecutionContext) -> StageReport {
        StageReport::Fraud(FraudReport {
            verdict: FraudVerdict::CheckRequired,
            confidence: 0.0,
            anomaly_count: 0,
            detection: Value::Null,
            anomalies: Value::Null,
            escalate_to_risk: false,
            error: Some(error.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, MediaType, SessionId};

    fn context() -> ExecutionContext {
        ExecutionContext::new(SessionId::generate(), ExecutionMode::Command, MediaType::Video)
    }

    fn results(confidence: f64, anomalies: usize) -> StageResults {
        let mut results = StageResults::default();
        results.outputs.insert(
            ActionKey::new("fraud_agent", DETECT_DEEPFAKES).unwrap(),
            json!({ "confidence": confidence }),
        );
        results.outputs.insert(
            ActionKey::new("fraud_agent", ANALYZE_ANOMALIES).unwrap(),
            json!({ "anomalies": vec!["anomaly"; anomalies] }),
        );
        results
    }

    #[test]
    fn classification_boundaries() {
        let stage = FraudStage::default();
        assert_eq!(stage.classify(0.1, 0), FraudVerdict::Safe);
        assert_eq!(stage.classify(0.5, 2), FraudVerdict::Safe);
        assert_eq!(stage.classify(0.6, 0), FraudVerdict::CheckRequired);
        assert_eq!(stage.classify(0.8, 0), FraudVerdict::CheckRequired);
        assert_eq!(stage.classify(0.0, 3), FraudVerdict::CheckRequired);
        assert_eq!(stage.classify(0.81, 0), FraudVerdict::Fraud);
        assert_eq!(stage.classify(0.0, 6), FraudVerdict::Fraud);
    }

    #[test]
    fn decides_from_service_outputs() {
        let stage = FraudStage::default();
        let report = stage.decide(&results(0.85, 6), &context());
        let fraud = report.as_fraud().unwrap();
        assert_eq!(fraud.verdict, FraudVerdict::Fraud);
        assert_eq!(fraud.anomaly_count, 6);
        assert!(stage.next_allowed_actions(&report).is_some());
    }

    #[test]
    fn safe_verdict_does_not_delegate() {
        let stage = FraudStage::default();
        let report = stage.decide(&StageResults::default(), &context());
        assert_eq!(report.as_fraud().unwrap().verdict, FraudVerdict::Safe);
        assert!(stage.next_allowed_actions(&report).is_none());
    }

    #[test]
    fn anomaly_count_field_is_accepted() {
        assert_eq!(anomaly_count(Some(&json!({"anomaly_count": 4}))), 4);
        assert_eq!(anomaly_count(Some(&json!({}))), 0);
    }

    #[test]
    fn plan_declares_both_steps_in_own_namespace() {
        let request = SessionRequest::new("Regular bank transfer", MediaType::Text, ExecutionMode::Command);
        let plan = FraudStage::default().build_plan(&request, &context());
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps.iter().all(|s| s.namespace == "fraud_agent"));
        assert_eq!(plan.steps[0].params["input"], json!("Regular bank transfer"));
    }

    #[test]
    fn degraded_report_requires_review() {
        let report = FraudStage::default().degraded("service down", &context());
        let fraud = report.as_fraud().unwrap();
        assert_eq!(fraud.verdict, FraudVerdict::CheckRequired);
        assert!(!fraud.escalate_to_risk);
        assert!(report.is_degraded());
    }
}
