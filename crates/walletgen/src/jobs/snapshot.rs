//! Durable JSON projection of the job registry.
//!
//! The snapshot keeps identity, owner, chain, count, progress, status and
//! creation time. Signals and output paths are process-local and are never
//! written. Recovery on load turns anything that was still running or paused
//! when the file was written into `failed`; `read_entries` skips that step
//! for read-only viewers.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{JobRecord, JobStatus};
use crate::chain::Chain;
use crate::error::StorageError;

/// One job as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: String,
    pub user_id: i64,
    pub chain: String,
    pub count: u64,
    #[serde(default)]
    pub processed: u64,
    pub status: String,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
}

impl SnapshotEntry {
    pub fn from_record(job: &JobRecord) -> Self {
        Self {
            id: job.id().to_string(),
            user_id: job.owner(),
            chain: job.chain().symbol().to_string(),
            count: job.count(),
            processed: job.processed(),
            status: job.status().as_str().to_string(),
            created_at: job.created_at().timestamp(),
        }
    }

    /// Rebuilds a record, demoting interrupted jobs to `failed`.
    ///
    /// Returns `None` when the chain is not recognised.
    pub fn into_recovered(self) -> Option<JobRecord> {
        let chain: Chain = match self.chain.parse() {
            Ok(chain) => chain,
            Err(e) => {
                log::warn!("Skipping snapshot entry {}: {}", self.id, e);
                return None;
            }
        };
        let status = recover_status(&self.status);
        if status.as_str() != self.status {
            log::info!(
                "Job {} was '{}' at last shutdown, marking failed",
                self.id,
                self.status
            );
        }
        let created_at = DateTime::<Utc>::from_timestamp(self.created_at, 0).unwrap_or_else(|| {
            log::warn!(
                "Job {} has invalid created_at {}, using now",
                self.id,
                self.created_at
            );
            Utc::now()
        });
        Some(JobRecord::restored(
            self.id,
            self.user_id,
            chain,
            self.count,
            self.processed,
            status,
            created_at,
        ))
    }
}

/// Terminal statuses survive a restart; everything else becomes `failed`.
pub fn recover_status(raw: &str) -> JobStatus {
    match raw {
        "done" => JobStatus::Done,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Failed,
    }
}

/// Rewrites the whole snapshot through a temp file and a rename.
pub fn write_snapshot(path: &Path, jobs: &[Arc<JobRecord>]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let entries: Vec<SnapshotEntry> = jobs.iter().map(|j| SnapshotEntry::from_record(j)).collect();
    let body = serde_json::to_vec_pretty(&entries)?;

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| StorageError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    file.write_all(&body)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StorageError::MoveFile {
        from: tmp.clone(),
        to: path.to_path_buf(),
        source: e,
    })
}

/// Reads the snapshot entries exactly as stored, without recovery.
///
/// A missing file is an empty list. Entries that fail to parse are skipped
/// with a warning; a file that is not a JSON array is a `Serialize` error.
pub fn read_entries(path: &Path) -> Result<Vec<SnapshotEntry>, StorageError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let values: Vec<serde_json::Value> = serde_json::from_slice(&raw)?;
    let mut entries = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<SnapshotEntry>(value) {
            Ok(entry) => entries.push(entry),
            Err(e) => log::warn!("Skipping malformed snapshot entry: {}", e),
        }
    }
    Ok(entries)
}

/// Reads and recovers the snapshot.
///
/// A file that cannot be parsed at all is moved aside to `<name>.corrupt`
/// and the registry starts empty.
pub fn read_snapshot(path: &Path) -> Result<Vec<JobRecord>, StorageError> {
    let entries = match read_entries(path) {
        Ok(entries) => entries,
        Err(StorageError::Serialize(e)) => {
            log::warn!(
                "Snapshot {} is unreadable ({}), starting with no jobs",
                path.display(),
                e
            );
            quarantine(path);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    Ok(entries
        .into_iter()
        .filter_map(SnapshotEntry::into_recovered)
        .collect())
}

fn quarantine(path: &Path) {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    let aside = std::path::PathBuf::from(name);
    match fs::rename(path, &aside) {
        Ok(()) => log::warn!("Moved unreadable snapshot to {}", aside.display()),
        Err(e) => log::warn!(
            "Failed to move unreadable snapshot {} aside: {}",
            path.display(),
            e
        ),
    }
}
