//! Authorization decision types.
//!
//! A [`DecisionRequest`] describes one tool/resource invocation. The policy
//! engine answers it with a [`DecisionResult`], which the cache keeps under a
//! [`DecisionKey`] for a sensitivity-dependent TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Reason attached to every fail-closed deny.
pub const EVALUATION_UNAVAILABLE_REASON: &str = "policy evaluation unavailable";

/// Data sensitivity of the resource or tool being authorized.
///
/// Drives how long a decision may be cached.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown sensitivity level '{}'", other)),
        }
    }
}

/// Input for a policy decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Subject identity (user or agent id).
    pub subject: String,
    /// Action being attempted (e.g. "tool:invoke").
    pub action: String,
    /// Resource identifier (server, dataset, endpoint...).
    pub resource: String,
    /// Tool name, when the action targets a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Sensitivity of the resource.
    #[serde(default)]
    pub sensitivity: Sensitivity,
}

impl DecisionRequest {
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            subject: subject.into(),
            action: action.into(),
            resource: resource.into(),
            tool: None,
            sensitivity,
        }
    }

    /// Set the tool name.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// Outcome of a policy decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub allow: bool,
    pub reason: String,
    pub evaluated_at: DateTime<Utc>,
    pub sensitivity: Sensitivity,
}

impl DecisionResult {
    /// Build a result stamped with the current time.
    pub fn new(allow: bool, reason: impl Into<String>, sensitivity: Sensitivity) -> Self {
        Self {
            allow,
            reason: reason.into(),
            evaluated_at: Utc::now(),
            sensitivity,
        }
    }

    /// Fail-closed deny returned when the policy engine cannot answer.
    pub fn unavailable(sensitivity: Sensitivity) -> Self {
        Self::new(false, EVALUATION_UNAVAILABLE_REASON, sensitivity)
    }
}

/// Deterministic fingerprint of (subject, action, resource, tool, sensitivity,
/// policy version).
///
/// Encoded as the SHA-256 of the canonical JSON form of those fields. The
/// engine sees sensitivity, so it is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecisionKey(String);

impl DecisionKey {
    pub fn derive(request: &DecisionRequest, policy_version: u64) -> Self {
        // serde_json objects are BTreeMap-backed, so keys serialize sorted.
        let canonical = serde_json::json!({
            "action": request.action,
            "policy_version": policy_version,
            "resource": request.resource,
            "sensitivity": request.sensitivity,
            "subject": request.subject,
            "tool": request.tool,
        })
        .to_string();

        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
