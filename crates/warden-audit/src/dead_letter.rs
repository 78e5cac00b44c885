//! Dead-letter sink.
//!
//! Terminal storage for batches that a sink could not take. Records are kept
//! in a bounded in-memory buffer for inspection and, when a path is
//! configured, appended to a JSON Lines file. Writes always succeed: a full
//! buffer evicts its oldest record and a failing file only logs.
//!
//! The file is rotated to `<stem>-<timestamp>-<seq>.<ext>` once it reaches
//! `max_file_bytes`, and only the newest `max_rotated_files` rotations are
//! kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;
use warden_core::Metrics;
use warden_core::config::DeadLetterConfig;

use crate::batch::Batch;
use crate::error::DeadLetterError;

/// A batch that could not be delivered to one sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub record_id: Uuid,
    pub batch: Batch,
    pub sink_name: String,
    pub failure_reason: String,
    pub first_failed_at: DateTime<Utc>,
    pub attempts: u32,
}

impl DeadLetterRecord {
    pub fn new(
        batch: Batch,
        sink_name: impl Into<String>,
        failure_reason: impl Into<String>,
        first_failed_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            batch,
            sink_name: sink_name.into(),
            failure_reason: failure_reason.into(),
            first_failed_at,
            attempts,
        }
    }
}

struct Mirror {
    path: PathBuf,
    max_file_bytes: u64,
    max_rotated_files: usize,
    state: Mutex<MirrorFile>,
}

struct MirrorFile {
    file: File,
    written: u64,
    rotations: u64,
}

/// Append-only fallback for undeliverable batches.
pub struct DeadLetterSink {
    capacity: usize,
    records: Mutex<VecDeque<DeadLetterRecord>>,
    mirror: Option<Mirror>,
    metrics: Arc<Metrics>,
}

impl DeadLetterSink {
    /// In-memory only.
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
            mirror: None,
            metrics,
        }
    }

    /// In-memory buffer plus a JSON Lines mirror at `path`, rotated with the
    /// default limits. Parent directories are created; an existing file is
    /// appended to.
    pub fn with_file(
        capacity: usize,
        path: impl AsRef<Path>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DeadLetterError> {
        let defaults = DeadLetterConfig::default();
        Self::with_rotating_file(
            capacity,
            path,
            defaults.max_file_bytes,
            defaults.max_rotated_files,
            metrics,
        )
    }

    /// Like [`with_file`](Self::with_file) with explicit rotation limits.
    pub fn with_rotating_file(
        capacity: usize,
        path: impl AsRef<Path>,
        max_file_bytes: u64,
        max_rotated_files: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        tracing::info!(
            path = %path.display(),
            max_file_bytes,
            max_rotated_files,
            "Dead-letter records mirrored to file"
        );
        Ok(Self {
            mirror: Some(Mirror {
                path,
                max_file_bytes: max_file_bytes.max(1),
                max_rotated_files,
                state: Mutex::new(MirrorFile {
                    file,
                    written,
                    rotations: 0,
                }),
            }),
            ..Self::new(capacity, metrics)
        })
    }

    pub fn from_config(
        config: &DeadLetterConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DeadLetterError> {
        match &config.path {
            Some(path) => Self::with_rotating_file(
                config.capacity,
                path,
                config.max_file_bytes,
                config.max_rotated_files,
                metrics,
            ),
            None => Ok(Self::new(config.capacity, metrics)),
        }
    }

    /// Store a record. Never fails and never blocks on anything but the
    /// buffer lock and a local file append.
    pub fn write(&self, record: DeadLetterRecord) {
        self.metrics.record_dead_letter_write();
        self.metrics
            .record_dead_lettered(&record.sink_name, record.batch.len() as u64);

        if let Some(mirror) = &self.mirror
            && let Err(e) = append(mirror, &record)
        {
            self.metrics.record_dead_letter_persist_failure();
            tracing::error!(
                path = %mirror.path.display(),
                record_id = %record.record_id,
                error = %e,
                "Failed to persist dead-letter record"
            );
        }

        let mut records = self.lock();
        if records.len() >= self.capacity
            && let Some(evicted) = records.pop_front()
        {
            self.metrics.record_dead_letter_eviction();
            tracing::error!(
                record_id = %evicted.record_id,
                sink = %evicted.sink_name,
                batch_id = %evicted.batch.batch_id,
                events = evicted.batch.len(),
                "Dead-letter buffer full, oldest record evicted"
            );
        }
        records.push_back(record);
    }

    /// Snapshot of the buffered records, oldest first.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> Option<&Path> {
        self.mirror.as_ref().map(|m| m.path.as_path())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetterRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn append(mirror: &Mirror, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let len = line.len() as u64;

    let mut state = mirror.state.lock().unwrap_or_else(|e| e.into_inner());
    if state.written > 0 && state.written.saturating_add(len) > mirror.max_file_bytes {
        rotate(mirror, &mut state)?;
    }
    state.file.write_all(line.as_bytes())?;
    state.file.flush()?;
    state.written += len;
    Ok(())
}

fn rotate(mirror: &Mirror, state: &mut MirrorFile) -> Result<(), DeadLetterError> {
    let (stem, ext) = name_parts(&mirror.path);
    let rotated = mirror.path.with_file_name(format!(
        "{}-{}-{:06}{}",
        stem,
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        state.rotations,
        ext
    ));
    std::fs::rename(&mirror.path, &rotated)?;
    state.file = open_append(&mirror.path)?;
    state.written = 0;
    state.rotations += 1;
    tracing::info!(
        path = %mirror.path.display(),
        rotated = %rotated.display(),
        "Dead-letter file rotated"
    );

    if let Err(e) = prune(mirror) {
        tracing::error!(path = %mirror.path.display(), error = %e, "Failed to prune rotated dead-letter files");
    }
    Ok(())
}

fn prune(mirror: &Mirror) -> Result<(), DeadLetterError> {
    let files = rotated_files(&mirror.path)?;
    let excess = files.len().saturating_sub(mirror.max_rotated_files);
    for old in &files[..excess] {
        std::fs::remove_file(old)?;
        tracing::warn!(path = %old.display(), "Oldest rotated dead-letter file removed");
    }
    Ok(())
}

/// File stem and `.ext` suffix (empty when there is no extension).
fn name_parts(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// Rotated siblings of the dead-letter file at `path`, oldest first.
pub fn rotated_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, DeadLetterError> {
    let path = path.as_ref();
    let (stem, ext) = name_parts(path);
    let prefix = format!("{}-", stem);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(&ext) && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read every record from a dead-letter JSON Lines file.
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<DeadLetterRecord>, DeadLetterError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| DeadLetterError::Malformed {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
