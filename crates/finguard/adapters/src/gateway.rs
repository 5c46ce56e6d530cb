//! HTTP gateway adapter
//!
//! Every invocation is a `POST {base}/invoke`:
//!
//! ```json
//! {"agent_type": "fraud", "action": "detect_deepfakes", "payload": {...},
//!  "metadata": {"requested_by": "finguard", "namespace": "fraud_agent"}}
//! ```
//!
//! and expects `{"status": "success", "result": {...}}` back. Any other status,
//! or an HTTP error, becomes a [`ServiceFailure`]: 4xx responses are
//! rejections, 5xx and transport errors are retryable.

use std::time::Duration;

use async_trait::async_trait;
use finguard_capability::{CapabilityService, ServiceFailure};
use finguard_policy::ActionKey;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AdapterError, AdapterResult};

pub struct GatewayCapabilityService {
    client: Client,
    base_url: String,
    requested_by: String,
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    agent_type: &'a str,
    action: &'a str,
    payload: &'a Value,
    metadata: InvokeMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct InvokeMetadata<'a> {
    requested_by: &'a str,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    status: String,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl GatewayCapabilityService {
    pub fn new(base_url: &str, timeout: Duration) -> AdapterResult<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(AdapterError::Config("gateway URL is empty".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            requested_by: "finguard".to_string(),
        })
    }

    pub fn with_requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = requested_by.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}/health`.
    pub async fn health_check(&self) -> AdapterResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AdapterError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn invoke(&self, action: &ActionKey, params: &Value) -> AdapterResult<InvokeResponse> {
        let namespace = action.namespace();
        let body = InvokeRequest {
            agent_type: agent_type(namespace),
            action: action.action(),
            payload: params,
            metadata: InvokeMetadata {
                requested_by: &self.requested_by,
                namespace,
            },
        };
        let response = self
            .client
            .post(format!("{}/invoke", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(AdapterError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Gateway agent type for a stage namespace: `fraud_agent` -> `fraud`.
fn agent_type(namespace: &str) -> &str {
    namespace.strip_suffix("_agent").unwrap_or(namespace)
}

fn failure(action: &ActionKey, err: AdapterError) -> ServiceFailure {
    match err {
        AdapterError::Api { status, message }
            if StatusCode::from_u16(status).is_ok_and(|s| s.is_client_error()) =>
        {
            ServiceFailure::rejected(format!("{action}: HTTP {status}: {message}"))
        }
        AdapterError::Api { status, message } => {
            ServiceFailure::remote(format!("{action}: HTTP {status}: {message}"))
        }
        other => ServiceFailure::remote(format!("{action}: {other}")),
    }
}

#[async_trait]
impl CapabilityService for GatewayCapabilityService {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn call(&self, action: &ActionKey, params: &Value) -> Result<Value, ServiceFailure> {
        debug!(%action, gateway = %self.base_url, "Invoking gateway");
        let response = self.invoke(action, params).await.map_err(|err| {
            warn!(%action, error = %err, "Gateway invocation failed");
            failure(action, err)
        })?;

        if response.status == "success" {
            Ok(response.result)
        } else {
            let message = response
                .error
                .unwrap_or_else(|| format!("gateway returned status '{}'", response.status));
            warn!(%action, %message, "Gateway reported error");
            Err(ServiceFailure::remote(format!("{action}: {message}")))
        }
    }
}
