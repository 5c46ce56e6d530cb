//! Pipeline configuration

use std::path::Path;
use std::time::Duration;

use finguard_capability::ServiceCallPolicy;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Top-level pipeline configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tokens: TokenConfig,
    pub service: ServiceConfig,
    pub fraud: FraudThresholds,
    pub risk: RiskThresholds,
}

impl PipelineConfig {
    /// Load configuration from a TOML file. Missing sections use defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let fraud = &self.fraud;
        if !(0.0..=1.0).contains(&fraud.review_confidence)
            || !(0.0..=1.0).contains(&fraud.fraud_confidence)
            || fraud.review_confidence > fraud.fraud_confidence
        {
            return Err(PipelineError::Config(
                "fraud confidence thresholds must satisfy 0 <= review <= fraud <= 1".into(),
            ));
        }
        if fraud.review_anomalies > fraud.fraud_anomalies {
            return Err(PipelineError::Config(
                "fraud.review_anomalies must not exceed fraud.fraud_anomalies".into(),
            ));
        }
        if self.risk.escalate_above > self.risk.block_above || self.risk.block_above > 100 {
            return Err(PipelineError::Config(
                "risk thresholds must satisfy escalate_above <= block_above <= 100".into(),
            ));
        }
        if self.tokens.delegation_validity_secs > self.tokens.validity_secs {
            return Err(PipelineError::Config(
                "tokens.delegation_validity_secs must not exceed tokens.validity_secs".into(),
            ));
        }
        if self.service.timeout_ms == 0 {
            return Err(PipelineError::Config("service.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub validity_secs: u64,
    pub delegation_validity_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            validity_secs: 3600,
            delegation_validity_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub timeout_ms: u64,
    pub retry_once: bool,
    pub retry_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_once: true,
            retry_backoff_ms: 250,
        }
    }
}

impl ServiceConfig {
    pub fn call_policy(&self) -> ServiceCallPolicy {
        ServiceCallPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_once: self.retry_once,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// FRAUD above the upper bounds, CHECK_REQUIRED above the lower ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudThresholds {
    pub fraud_confidence: f64,
    pub review_confidence: f64,
    pub fraud_anomalies: u32,
    pub review_anomalies: u32,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            fraud_confidence: 0.8,
            review_confidence: 0.5,
            fraud_anomalies: 5,
            review_anomalies: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub escalate_above: u8,
    pub block_above: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            escalate_above: 70,
            block_above: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.tokens.validity_secs, 3600);
        assert_eq!(config.tokens.delegation_validity_secs, 1800);
        assert_eq!(config.risk.block_above, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [service]
            timeout_ms = 500

            [risk]
            escalate_above = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.service.timeout_ms, 500);
        assert!(config.service.retry_once);
        assert_eq!(config.risk.escalate_above, 60);
        assert_eq!(config.risk.block_above, 80);
        assert_eq!(config.fraud, FraudThresholds::default());
        assert_eq!(config.service.call_policy().timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = PipelineConfig::from_toml_str("[risk]\nescalate_above = 90\n").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(PipelineConfig::load("/nonexistent/finguard.toml").is_err());
    }
}
