//! Wire formats spoken by [`HttpSink`](super::HttpSink).

use serde_json::{Value, json};
use warden_core::config::{SinkConfig, SinkKind};

use crate::event::AuditEvent;

/// How a batch is encoded and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFormat {
    /// JSON array of events, `Authorization: Bearer <token>`.
    Json,

    /// Newline-delimited Splunk HEC envelopes, `Authorization: Splunk <token>`.
    SplunkHec {
        index: Option<String>,
        source: String,
        sourcetype: String,
    },

    /// JSON array of Datadog log records, `DD-API-KEY: <token>`.
    Datadog {
        source: String,
        service: String,
        environment: String,
    },
}

impl WireFormat {
    pub fn from_config(config: &SinkConfig) -> Self {
        match config.kind {
            SinkKind::Json => Self::Json,
            SinkKind::SplunkHec => Self::SplunkHec {
                index: config.index.clone(),
                source: config.source.clone(),
                sourcetype: config.sourcetype.clone(),
            },
            SinkKind::Datadog => Self::Datadog {
                source: config.source.clone(),
                service: config.service.clone(),
                environment: config.environment.clone(),
            },
        }
    }

    /// Encode `events` as a request body.
    pub fn encode(&self, events: &[AuditEvent]) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Json => serde_json::to_vec(events),
            Self::SplunkHec {
                index,
                source,
                sourcetype,
            } => {
                let mut body = Vec::new();
                for (i, event) in events.iter().enumerate() {
                    if i > 0 {
                        body.push(b'\n');
                    }
                    let mut envelope = json!({
                        "time": event.timestamp.timestamp_millis() as f64 / 1000.0,
                        "source": source,
                        "sourcetype": sourcetype,
                        "event": event,
                    });
                    if let Some(index) = index {
                        envelope["index"] = Value::String(index.clone());
                    }
                    serde_json::to_writer(&mut body, &envelope)?;
                }
                Ok(body)
            }
            Self::Datadog {
                source,
                service,
                environment,
            } => {
                let records: Vec<Value> = events
                    .iter()
                    .map(|event| datadog_record(event, source, service, environment))
                    .collect();
                serde_json::to_vec(&records)
            }
        }
    }

    /// Header carrying the credential, as `(name, value)`.
    pub fn auth_header(&self, token: &str) -> (&'static str, String) {
        match self {
            Self::Json => ("Authorization", format!("Bearer {}", token)),
            Self::SplunkHec { .. } => ("Authorization", format!("Splunk {}", token)),
            Self::Datadog { .. } => ("DD-API-KEY", token.to_string()),
        }
    }
}

fn datadog_record(event: &AuditEvent, source: &str, service: &str, environment: &str) -> Value {
    let outcome = if event.decision.allow { "allow" } else { "deny" };
    let tags = [
        format!("env:{}", environment),
        format!("service:{}", service),
        format!("decision:{}", outcome),
        format!("sensitivity:{}", event.decision.sensitivity),
    ];

    json!({
        "ddsource": source,
        "ddtags": tags.join(","),
        "service": service,
        "message": event.to_log_line(),
        "timestamp": event.timestamp.timestamp_millis(),
        "event_id": event.event_id,
        "decision": outcome,
        "warden": event,
    })
}
