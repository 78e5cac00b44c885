//! HTTP sink: one POST per batch.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde_json::json;
use std::io::Write;
use warden_core::config::SinkConfig;

use super::Sink;
use super::format::WireFormat;
use crate::batch::Batch;
use crate::error::DeliveryError;

/// Gzip settings for request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gzip {
    /// Bodies shorter than this are sent as-is.
    pub min_bytes: usize,
    /// 0 (store) to 9 (best).
    pub level: u32,
}

impl Gzip {
    fn compress(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(body.len() / 4),
            flate2::Compression::new(self.level.min(9)),
        );
        encoder.write_all(body)?;
        encoder.finish()
    }
}

/// Posts batches to a SIEM HTTP endpoint. Any 2xx is success.
#[derive(Debug, Clone)]
pub struct HttpSink {
    name: String,
    url: String,
    token: Option<String>,
    format: WireFormat,
    gzip: Option<Gzip>,
    health_url: Option<String>,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        token: Option<String>,
        format: WireFormat,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            token,
            format,
            gzip: None,
            health_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Compress bodies of at least `gzip.min_bytes`.
    pub fn with_gzip(mut self, gzip: Gzip) -> Self {
        self.gzip = Some(gzip);
        self
    }

    /// Check `url` with a GET instead of the format's default health check.
    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        let token = config.resolve_token();
        if token.is_none() {
            tracing::warn!(sink = %config.name, "Sink has no credential configured");
        }
        let mut sink = Self::new(
            config.name.clone(),
            config.url.clone(),
            token,
            WireFormat::from_config(config),
        );
        if config.compression {
            sink = sink.with_gzip(Gzip {
                min_bytes: config.compression_min_bytes,
                level: config.compression_level,
            });
        }
        if let Some(url) = &config.health_url {
            sink = sink.with_health_url(url.clone());
        }
        sink
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn format(&self) -> &WireFormat {
        &self.format
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => {
                let (header, value) = self.format.auth_header(token);
                req.header(header, value)
            }
            None => req,
        }
    }

    /// The request a health check sends, or `None` when the format has no
    /// health endpoint.
    fn health_request(&self) -> Option<reqwest::RequestBuilder> {
        if let Some(url) = &self.health_url {
            return Some(self.client.get(url));
        }
        match &self.format {
            WireFormat::Json => None,
            WireFormat::SplunkHec { .. } => Some(self.client.get(splunk_health_url(&self.url))),
            WireFormat::Datadog {
                source,
                service,
                environment,
            } => {
                let test_log = json!([{
                    "ddsource": source,
                    "ddtags": format!("env:{},service:{},health_check:true", environment, service),
                    "message": "warden health check",
                    "service": service,
                }]);
                Some(self.client.post(&self.url).json(&test_log))
            }
        }
    }
}

/// Splunk HEC exposes its health endpoint next to the event endpoint.
fn splunk_health_url(url: &str) -> String {
    let base = match url.find("/services/collector") {
        Some(pos) => &url[..pos],
        None => url.trim_end_matches('/'),
    };
    format!("{}/services/collector/health", base)
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = self.format.encode(&batch.events)?;

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        let body = match &self.gzip {
            Some(gzip) if body.len() >= gzip.min_bytes => {
                req = req.header(CONTENT_ENCODING, "gzip");
                gzip.compress(&body)?
            }
            _ => body,
        };

        let resp = self.authorize(req.body(body)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            sink = %self.name,
            batch_id = %batch.batch_id,
            events = batch.len(),
            "Batch accepted by sink"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        let Some(req) = self.health_request() else {
            return Ok(());
        };
        let status = self.authorize(req).send().await?.status();
        if !status.is_success() {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditEvent;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use warden_core::config::SinkKind;
    use warden_core::decision::{DecisionResult, Sensitivity};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn batch(n: usize) -> Batch {
        Batch::new(
            (0..n)
                .map(|_| AuditEvent::new(DecisionResult::new(true, "ok", Sensitivity::Low)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_splunk_hec_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/collector/event"))
            .and(header("authorization", "Splunk hec-token"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            kind: SinkKind::SplunkHec,
            token: Some("hec-token".to_string()),
            compression: false,
            ..SinkConfig::new("splunk", format!("{}/services/collector/event", server.uri()))
        };
        let sink = HttpSink::from_config(&config);
        sink.send_batch(&batch(3)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert_eq!(body.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_datadog_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("dd-api-key", "dd-key"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            kind: SinkKind::Datadog,
            token: Some("dd-key".to_string()),
            ..SinkConfig::new("datadog", server.uri())
        };
        HttpSink::from_config(&config)
            .send_batch(&batch(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = HttpSink::new("siem", server.uri(), None, WireFormat::Json);
        let err = sink.send_batch(&batch(1)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let sink = HttpSink::new("siem", "http://127.0.0.1:1/ingest", None, WireFormat::Json);
        let err = sink.send_batch(&batch(1)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_large_body_is_gzipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = HttpSink::new("siem", server.uri(), None, WireFormat::Json)
            .with_gzip(Gzip { min_bytes: 64, level: 6 });
        sink.send_batch(&batch(5)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers["content-encoding"], "gzip");
        let mut json = String::new();
        GzDecoder::new(requests[0].body.as_slice())
            .read_to_string(&mut json)
            .unwrap();
        let events: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_small_body_is_sent_plain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = HttpSink::new("siem", server.uri(), None, WireFormat::Json)
            .with_gzip(Gzip { min_bytes: 1 << 20, level: 6 });
        sink.send_batch(&batch(1)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("content-encoding").is_none());
        let events: Vec<serde_json::Value> = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_splunk_health_url() {
        assert_eq!(
            splunk_health_url("https://splunk:8088/services/collector/event"),
            "https://splunk:8088/services/collector/health"
        );
        assert_eq!(
            splunk_health_url("https://splunk:8088/"),
            "https://splunk:8088/services/collector/health"
        );
    }

    #[tokio::test]
    async fn test_splunk_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/collector/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            kind: SinkKind::SplunkHec,
            ..SinkConfig::new("splunk", format!("{}/services/collector/event", server.uri()))
        };
        HttpSink::from_config(&config).health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_datadog_health_check_posts_test_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("dd-api-key", "dd-key"))
            .and(body_string_contains("health_check:true"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            kind: SinkKind::Datadog,
            token: Some("dd-key".to_string()),
            ..SinkConfig::new("datadog", server.uri())
        };
        let err = HttpSink::from_config(&config).health_check().await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 403 }));
    }

    #[tokio::test]
    async fn test_json_sink_without_health_url_is_not_checked() {
        let sink = HttpSink::new("siem", "http://127.0.0.1:1/ingest", None, WireFormat::Json);
        sink.health_check().await.unwrap();

        let sink = sink.with_health_url("http://127.0.0.1:1/health");
        assert!(matches!(
            sink.health_check().await,
            Err(DeliveryError::Transport(_))
        ));
    }
}
