//! Deterministic in-process capability service.
//!
//! Fraud signals come from a keyword scan of the session input. Request
//! metadata may pin any signal directly, which makes runs reproducible:
//!
//! | metadata key          | action                              |
//! |-----------------------|-------------------------------------|
//! | `deepfake_confidence` | `fraud_agent/detect_deepfakes`      |
//! | `anomaly_count`       | `fraud_agent/analyze_anomalies`     |
//! | `risk_score`          | `risk_agent/calculate_risk_score`   |
//! | `aml_status`          | `compliance_agent/check_aml_kyc`    |
//! | `violations`          | `compliance_agent/validate_regulations` |

use async_trait::async_trait;
use finguard_capability::{CapabilityService, ServiceFailure};
use finguard_policy::ActionKey;
use serde_json::{json, Value};
use tracing::debug;

const HIGH_RISK_TERMS: &[&str] = &[
    "urgent wire",
    "gift card",
    "wire immediately",
    "account suspended",
    "irs penalty",
    "arrest warrant",
];
const MEDIUM_RISK_TERMS: &[&str] = &[
    "verify your account",
    "update payment",
    "unusual activity",
    "confirm identity",
    "changed bank details",
];
const PRESSURE_TERMS: &[&str] = &["act now", "limited time", "claim reward", "congratulations"];
const CRYPTO_TERMS: &[&str] = &["crypto", "bitcoin", "ethereum", "wallet", "usdt"];
const TRANSFER_TERMS: &[&str] = &["transfer", "send", "wire", "deposit", "withdraw"];

/// Keyword findings for one input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordScan {
    pub indicators: Vec<String>,
    pub score: f64,
}

impl KeywordScan {
    pub fn of(input: &str) -> Self {
        let text = input.to_lowercase();
        let mut scan = Self::default();
        for (terms, weight) in [
            (HIGH_RISK_TERMS, 0.3),
            (MEDIUM_RISK_TERMS, 0.2),
            (PRESSURE_TERMS, 0.25),
        ] {
            for term in terms.iter().filter(|t| text.contains(**t)) {
                scan.score += weight;
                scan.indicators.push((*term).to_string());
            }
        }
        let crypto = CRYPTO_TERMS.iter().any(|t| text.contains(t));
        let transfer = TRANSFER_TERMS.iter().any(|t| text.contains(t));
        if crypto && transfer {
            scan.score += 0.4;
            scan.indicators.push("crypto_transfer_combo".to_string());
        }
        scan.score = scan.score.min(1.0);
        scan
    }

    /// Deepfake confidence derived from the keyword score.
    pub fn confidence(&self) -> f64 {
        round2((self.score * 1.2).min(1.0))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCapabilityService;

impl SignalCapabilityService {
    pub fn new() -> Self {
        Self
    }

    fn detect_deepfakes(params: &Value) -> Value {
        let scan = KeywordScan::of(input(params));
        let confidence = pinned(params, "deepfake_confidence")
            .and_then(Value::as_f64)
            .unwrap_or_else(|| scan.confidence());
        json!({
            "confidence": confidence,
            "media_type": params.get("media_type"),
            "indicators": scan.indicators,
        })
    }

    fn analyze_anomalies(params: &Value) -> Value {
        match pinned(params, "anomaly_count").and_then(Value::as_u64) {
            Some(count) => json!({ "anomaly_count": count }),
            None => json!({ "anomalies": KeywordScan::of(input(params)).indicators }),
        }
    }

    fn calculate_risk_score(params: &Value) -> Value {
        if let Some(score) = pinned(params, "risk_score").and_then(Value::as_f64) {
            return json!({ "risk_score": score.clamp(0.0, 100.0) });
        }
        let indicators = params.get("fraud_indicators");
        let confidence = indicators
            .and_then(|i| i.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let anomalies = indicators
            .and_then(|i| i.get("anomaly_count"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let multiplier = params
            .get("severity_multiplier")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        let score = ((confidence * 60.0 + anomalies * 5.0) * multiplier).clamp(0.0, 100.0);
        json!({ "risk_score": score.round() })
    }

    fn assess_impact(params: &Value) -> Value {
        let threat = params.get("threat_type").and_then(Value::as_str).unwrap_or("SAFE");
        let (severity, recommendations) = match threat {
            "FRAUD" => (
                "HIGH",
                vec!["Freeze outgoing transfers", "Contact account holder"],
            ),
            "CHECK_REQUIRED" => ("MEDIUM", vec!["Verify counterparty out of band"]),
            _ => ("LOW", vec!["No action required"]),
        };
        json!({ "severity": severity, "recommendations": recommendations })
    }

    fn check_aml_kyc(params: &Value) -> Value {
        let status = pinned(params, "aml_status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let risk = params.get("risk_score").and_then(Value::as_u64).unwrap_or(0);
                let status = if risk > 80 { "REVIEW" } else { "CLEAR" };
                status.to_string()
            });
        json!({ "aml_status": status })
    }

    fn validate_regulations(params: &Value) -> Value {
        let violations = pinned(params, "violations")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let required: Vec<&str> = match violations.as_array() {
            Some(list) if !list.is_empty() => vec!["File suspicious activity report"],
            _ => Vec::new(),
        };
        json!({ "violations": violations, "required_actions": required })
    }

    fn consolidate_findings(params: &Value) -> Value {
        let count = |field: &str| {
            params
                .get(field)
                .and_then(Value::as_array)
                .map_or(0, Vec::len)
        };
        json!({
            "stored": true,
            "reports": count("reports"),
            "blocked_actions": count("blocked_actions"),
            "errors": count("errors"),
        })
    }

    fn generate_audit_trail(params: &Value) -> Value {
        let entries = params
            .get("audit_trail")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        json!({ "stored": true, "entries": entries })
    }
}

fn input(params: &Value) -> &str {
    params.get("input").and_then(Value::as_str).unwrap_or_default()
}

fn pinned<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get("metadata").and_then(|m| m.get(key))
}

#[async_trait]
impl CapabilityService for SignalCapabilityService {
    fn name(&self) -> &str {
        "signal"
    }

    async fn call(&self, action: &ActionKey, params: &Value) -> Result<Value, ServiceFailure> {
        debug!(%action, "Signal service invoked");
        let result = match (action.namespace(), action.action()) {
            ("fraud_agent", "detect_deepfakes") => Self::detect_deepfakes(params),
            ("fraud_agent", "analyze_anomalies") => Self::analyze_anomalies(params),
            ("risk_agent", "calculate_risk_score") => Self::calculate_risk_score(params),
            ("risk_agent", "assess_impact") => Self::assess_impact(params),
            ("compliance_agent", "check_aml_kyc") => Self::check_aml_kyc(params),
            ("compliance_agent", "validate_regulations") => Self::validate_regulations(params),
            ("memory_agent", "consolidate_findings") => Self::consolidate_findings(params),
            ("memory_agent", "generate_audit_trail") => Self::generate_audit_trail(params),
            _ => return Err(ServiceFailure::rejected(format!("unknown action {action}"))),
        };
        Ok(result)
    }
}
