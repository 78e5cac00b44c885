//! `warden check` command implementation.
//!
//! Loads and validates a configuration file, then reports what the runtime
//! would start with and anything that looks like a mistake.

use anyhow::{Context, Result};
use std::path::Path;
use warden_core::WardenConfig;

/// Severity level for check findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    pub message: String,
}

impl CheckFinding {
    fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

pub fn run(path: &Path) -> Result<()> {
    let config = WardenConfig::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("Configuration {} is valid.\n", path.display());
    let findings = inspect(&config);
    for finding in &findings {
        println!("[{}] {}", finding.severity, finding.message);
    }

    let warnings = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    if warnings > 0 {
        println!("\n{} warning(s)", warnings);
    }
    Ok(())
}

/// Summarize a validated configuration.
pub fn inspect(config: &WardenConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    match config.evaluator.resolve_url() {
        Some(url) => findings.push(CheckFinding::info(format!(
            "evaluator: {} (timeout {}s, circuit {} failures / {}s)",
            url,
            config.evaluator.timeout,
            config.evaluator.circuit_threshold,
            config.evaluator.circuit_reset_timeout
        ))),
        None => findings.push(CheckFinding::warning(
            "evaluator: no URL configured; `warden serve` will refuse to start",
        )),
    }

    let cache = &config.cache;
    findings.push(CheckFinding::info(format!(
        "cache: ttl low/medium/high/critical = {}/{}/{}/{}s, {} shards",
        cache.ttl_low, cache.ttl_medium, cache.ttl_high, cache.ttl_critical, cache.shards
    )));

    let audit = &config.audit;
    findings.push(CheckFinding::info(format!(
        "audit: queue {} events, batches of {} or every {}s, drain {}s",
        audit.queue_capacity, audit.batch_size, audit.batch_timeout, audit.drain_timeout
    )));
    match &audit.dead_letter.path {
        Some(path) => findings.push(CheckFinding::info(format!(
            "dead-letter: {} records in memory, mirrored to {}",
            audit.dead_letter.capacity,
            path.display()
        ))),
        None => findings.push(CheckFinding::warning(format!(
            "dead-letter: memory only ({} records); records are lost on restart",
            audit.dead_letter.capacity
        ))),
    }

    let enabled: Vec<_> = config.enabled_sinks().collect();
    if enabled.is_empty() {
        findings.push(CheckFinding::warning(
            "sinks: none enabled; audit events will not leave this process",
        ));
    }
    for sink in &config.sinks {
        if !sink.enabled {
            findings.push(CheckFinding::info(format!("sink '{}': disabled", sink.name)));
            continue;
        }
        findings.push(CheckFinding::info(format!(
            "sink '{}': {:?} -> {} ({} attempts, timeout {}s)",
            sink.name, sink.kind, sink.url, sink.max_attempts, sink.timeout
        )));
        if sink.resolve_token().is_none() {
            findings.push(CheckFinding::warning(format!(
                "sink '{}': no credential configured",
                sink.name
            )));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warnings(findings: &[CheckFinding]) -> Vec<&str> {
        findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .map(|f| f.message.as_str())
            .collect()
    }

    #[test]
    fn test_empty_config_warns() {
        let findings = inspect(&WardenConfig::default());
        let warnings = warnings(&findings);
        assert!(warnings.iter().any(|w| w.starts_with("evaluator:")));
        assert!(warnings.iter().any(|w| w.starts_with("sinks: none enabled")));
        assert!(warnings.iter().any(|w| w.starts_with("dead-letter:")));
    }

    #[test]
    fn test_complete_config_has_only_token_warning() {
        let yaml = r#"
evaluator:
  url: http://opa:8181/v1/data/warden/allow
audit:
  dead_letter:
    path: /var/lib/warden/dead-letters.jsonl
sinks:
  - name: splunk
    kind: splunk_hec
    url: https://splunk:8088/services/collector/event
    token: hec
  - name: datadog
    kind: datadog
    url: https://http-intake.logs.datadoghq.com/api/v2/logs
"#;
        let config = WardenConfig::from_yaml(yaml).unwrap();
        config.validate().unwrap();

        let findings = inspect(&config);
        assert_eq!(
            warnings(&findings),
            vec!["sink 'datadog': no credential configured"]
        );
    }

    #[test]
    fn test_run_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yaml");
        std::fs::write(&path, "sinks:\n  - name: a\n    url: http://a\n    max_attempts: 0\n")
            .unwrap();

        let err = run(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("max_attempts"));
    }
}
