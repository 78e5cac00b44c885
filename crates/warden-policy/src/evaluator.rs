//! Policy engine seam.
//!
//! The engine is opaque: Warden sends the decision input and reads back an
//! allow flag and a reason. [`HttpPolicyEvaluator`] speaks the OPA data API
//! shape (`{"input": ...}` in, `{"result": {...}}` out).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_core::config::EvaluatorConfig;
use warden_core::decision::{DecisionRequest, Sensitivity};

use crate::error::EvaluationError;

/// Reason used when the engine allows or denies without explaining why.
const DEFAULT_REASON: &str = "policy evaluation completed";

/// The engine's answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub allow: bool,
    pub reason: String,
}

impl PolicyVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allow: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: reason.into(),
        }
    }
}

/// Trait for policy engines.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate one request.
    async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError>;
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    input: EngineInput<'a>,
}

#[derive(Serialize)]
struct EngineInput<'a> {
    subject: &'a str,
    action: &'a str,
    resource: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<&'a str>,
    sensitivity: Sensitivity,
}

#[derive(Deserialize)]
struct EngineResponse {
    #[serde(default)]
    result: Option<EngineResult>,
}

#[derive(Deserialize)]
struct EngineResult {
    #[serde(default)]
    allow: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    audit_reason: Option<String>,
}

/// Evaluator backed by an HTTP policy engine.
#[derive(Debug, Clone)]
pub struct HttpPolicyEvaluator {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpPolicyEvaluator {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token,
        }
    }

    /// Build from configuration, resolving the URL and token from the
    /// environment where configured.
    pub fn from_config(config: &EvaluatorConfig) -> Result<Self, EvaluationError> {
        let url = config.resolve_url().ok_or(EvaluationError::NotConfigured)?;
        Ok(Self::new(url, config.resolve_token()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PolicyEvaluator for HttpPolicyEvaluator {
    async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError> {
        let body = EngineRequest {
            input: EngineInput {
                subject: &request.subject,
                action: &request.action,
                resource: &request.resource,
                tool: request.tool.as_deref(),
                sensitivity: request.sensitivity,
            },
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EvaluationError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = resp.bytes().await?;
        let parsed: EngineResponse = serde_json::from_slice(&bytes)
            .map_err(|e| EvaluationError::Malformed(e.to_string()))?;

        let verdict = match parsed.result {
            Some(result) => PolicyVerdict {
                allow: result.allow.unwrap_or(false),
                reason: result
                    .reason
                    .or(result.audit_reason)
                    .unwrap_or_else(|| DEFAULT_REASON.to_string()),
            },
            None => PolicyVerdict::deny("policy returned no result"),
        };

        tracing::debug!(
            subject = %request.subject,
            action = %request.action,
            resource = %request.resource,
            allow = verdict.allow,
            "Policy evaluated"
        );
        Ok(verdict)
    }
}
