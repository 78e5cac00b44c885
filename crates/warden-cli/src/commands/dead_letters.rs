//! `warden dead-letters`: inspect the dead-letter mirror file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use warden_audit::{DeadLetterRecord, read_log, rotated_files};

pub fn run(file: &Path, sink: Option<&str>, json: bool, rotated: bool) -> Result<()> {
    let records = select(load(file, rotated)?, sink);

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No dead-letter records.");
        return Ok(());
    }
    for line in render(&records) {
        println!("{}", line);
    }
    let events: usize = records.iter().map(|r| r.batch.len()).sum();
    println!("\n{} record(s), {} event(s)", records.len(), events);
    Ok(())
}

/// Records from `file`, preceded by its rotated siblings when `rotated` is set.
pub fn load(file: &Path, rotated: bool) -> Result<Vec<DeadLetterRecord>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if rotated {
        files = rotated_files(file)
            .with_context(|| format!("Failed to list rotated files for {}", file.display()))?;
    }
    files.push(file.to_path_buf());

    let mut records = Vec::new();
    for path in &files {
        records.extend(
            read_log(path)
                .with_context(|| format!("Failed to read dead-letter file {}", path.display()))?,
        );
    }
    Ok(records)
}

/// Records for `sink`, or all of them.
pub fn select(records: Vec<DeadLetterRecord>, sink: Option<&str>) -> Vec<DeadLetterRecord> {
    match sink {
        Some(name) => records.into_iter().filter(|r| r.sink_name == name).collect(),
        None => records,
    }
}

fn render(records: &[DeadLetterRecord]) -> Vec<String> {
    let sink_width = records
        .iter()
        .map(|r| r.sink_name.len())
        .max()
        .unwrap_or(0)
        .max("SINK".len());

    let mut lines = vec![format!(
        "{:<25}  {:<sink_width$}  {:>6}  {:>8}  {:<36}  REASON",
        "FIRST FAILED", "SINK", "EVENTS", "ATTEMPTS", "BATCH"
    )];
    for r in records {
        lines.push(format!(
            "{:<25}  {:<sink_width$}  {:>6}  {:>8}  {:<36}  {}",
            r.first_failed_at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            r.sink_name,
            r.batch.len(),
            r.attempts,
            r.batch.batch_id.to_string(),
            r.failure_reason
        ));
    }
    lines
}
