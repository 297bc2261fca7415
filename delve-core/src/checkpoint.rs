//! Run-state persistence.
//!
//! The orchestrator appends a snapshot after every state mutation. Snapshots
//! are the exact string produced by [`RunState::to_snapshot`], stored
//! verbatim, so a restored state re-serializes byte for byte.
//!
//! [`RunState::to_snapshot`]: crate::RunState::to_snapshot

use crate::error::CheckpointError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run_id: String,
    /// Starts at 1 and increases by one per append
    pub sequence: u64,
    pub snapshot: String,
    pub saved_at_ms: u64,
}

impl CheckpointRecord {
    fn new(run_id: &str, sequence: u64, snapshot: String) -> Self {
        let saved_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            run_id: run_id.to_string(),
            sequence,
            snapshot,
            saved_at_ms,
        }
    }
}

/// Append-only snapshot storage keyed by run id.
#[async_trait]
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    async fn append(
        &self,
        run_id: &str,
        snapshot: String,
    ) -> Result<CheckpointRecord, CheckpointError>;

    async fn latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>, CheckpointError>;

    /// All records for a run, oldest first.
    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError>;
}

/// Run ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_run_id(run_id: &str) -> Result<(), CheckpointError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidRunId(run_id.to_string()))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: StdMutex<HashMap<String, Vec<CheckpointRecord>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn append(
        &self,
        run_id: &str,
        snapshot: String,
    ) -> Result<CheckpointRecord, CheckpointError> {
        validate_run_id(run_id)?;
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let records = runs.entry(run_id.to_string()).or_default();
        let record = CheckpointRecord::new(run_id, records.len() as u64 + 1, snapshot);
        records.push(record.clone());
        Ok(record)
    }

    async fn latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_run_id(run_id)?;
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(runs.get(run_id).and_then(|r| r.last().cloned()))
    }

    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        validate_run_id(run_id)?;
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// Last record is complete but lacks its newline
    Unterminated,
    /// Last line is partial; holds the length of the intact prefix
    Torn(u64),
}

/// One JSON Lines file per run under a base directory.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    // Next sequence per run, loaded lazily. Held across writes so appends
    // to the same store are serialized.
    sequences: Mutex<HashMap<String, u64>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    /// Records of a run and the state of the file's last line.
    async fn read_file(
        &self,
        run_id: &str,
    ) -> Result<(Vec<CheckpointRecord>, Tail), CheckpointError> {
        let path = self.path_for(run_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Vec::new(), Tail::Clean))
            }
            Err(e) => return Err(e.into()),
        };
        let mut tail = if content.is_empty() || content.ends_with('\n') {
            Tail::Clean
        } else {
            Tail::Unterminated
        };
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                // A crash mid-append can leave a partial last line.
                Err(e) if tail == Tail::Unterminated && i + 1 == lines.len() => {
                    log::warn!("Ignoring torn checkpoint line in {}: {}", path.display(), e);
                    tail = Tail::Torn(content.rfind('\n').map_or(0, |i| i as u64 + 1));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((records, tail))
    }

    async fn read_records(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(self.read_file(run_id).await?.0)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn append(
        &self,
        run_id: &str,
        snapshot: String,
    ) -> Result<CheckpointRecord, CheckpointError> {
        validate_run_id(run_id)?;
        let mut sequences = self.sequences.lock().await;

        let (last, tail) = match sequences.get(run_id) {
            Some(last) => (*last, Tail::Clean),
            None => {
                let (records, tail) = self.read_file(run_id).await?;
                (records.last().map_or(0, |r| r.sequence), tail)
            }
        };
        let record = CheckpointRecord::new(run_id, last + 1, snapshot);

        let mut line = if tail == Tail::Unterminated {
            String::from("\n")
        } else {
            String::new()
        };
        line.push_str(&serde_json::to_string(&record)?);
        line.push('\n');
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(run_id))
            .await?;
        if let Tail::Torn(len) = tail {
            log::warn!("Dropping torn checkpoint tail of run {}", run_id);
            file.set_len(len).await?;
        }
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        sequences.insert(run_id.to_string(), record.sequence);
        log::debug!("Checkpoint {} saved for run {}", record.sequence, run_id);
        Ok(record)
    }

    async fn latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>, CheckpointError> {
        validate_run_id(run_id)?;
        Ok(self.read_records(run_id).await?.pop())
    }

    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        validate_run_id(run_id)?;
        self.read_records(run_id).await
    }
}
