//! In-memory job registry mirrored to the on-disk snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::lock;
use super::record::JobRecord;
use super::snapshot;
use crate::chain::Chain;
use crate::error::{JobError, StorageError};

/// Registry of every job known to this process.
///
/// Constructed once at start-up and shared by `Arc` between the controller,
/// the workers and the progress reporters.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<JobRecord>>>,
    snapshot_path: Option<PathBuf>,
    /// Serialises snapshot rewrites so two writers never race on the temp file.
    write_lock: Mutex<()>,
}

impl JobStore {
    /// A store without durable backing, for tests and one-shot tools.
    pub fn in_memory() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            snapshot_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens the snapshot at `path`, recovering interrupted jobs as failed.
    /// An unparseable snapshot is set aside and the store opens empty.
    ///
    /// The recovered registry is written back immediately so the file never
    /// claims a job is still running.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let recovered = snapshot::read_snapshot(&path)?;
        let jobs: HashMap<String, Arc<JobRecord>> = recovered
            .into_iter()
            .map(|job| (job.id().to_string(), Arc::new(job)))
            .collect();

        log::info!(
            "Loaded {} job(s) from snapshot {}",
            jobs.len(),
            path.display()
        );

        let store = Self {
            jobs: RwLock::new(jobs),
            snapshot_path: Some(path),
            write_lock: Mutex::new(()),
        };
        store.persist();
        Ok(store)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobRecord>>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobRecord>>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Registers a new running job under a fresh 8-hex-digit id.
    pub fn create(&self, owner: i64, chain: Chain, count: u64) -> Arc<JobRecord> {
        let mut jobs = self.write();
        let id = loop {
            let candidate = short_id();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        let job = Arc::new(JobRecord::new(id.clone(), owner, chain, count));
        jobs.insert(id, Arc::clone(&job));
        job
    }

    pub fn get(&self, id: &str) -> Option<Arc<JobRecord>> {
        self.read().get(id).cloned()
    }

    /// Looks a job up on behalf of `requester`; only owners and admins see it.
    pub fn get_for(
        &self,
        id: &str,
        requester: i64,
        is_admin: bool,
    ) -> Result<Arc<JobRecord>, JobError> {
        let job = self
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.owner() != requester && !is_admin {
            return Err(JobError::Forbidden(id.to_string()));
        }
        Ok(job)
    }

    /// Jobs owned by `owner`, oldest first.
    pub fn list_for_user(&self, owner: i64) -> Vec<Arc<JobRecord>> {
        let mut jobs: Vec<Arc<JobRecord>> = self
            .read()
            .values()
            .filter(|j| j.owner() == owner)
            .cloned()
            .collect();
        sort_jobs(&mut jobs);
        jobs
    }

    /// Every job, oldest first.
    pub fn list_all(&self) -> Vec<Arc<JobRecord>> {
        let mut jobs: Vec<Arc<JobRecord>> = self.read().values().cloned().collect();
        sort_jobs(&mut jobs);
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Writes the snapshot, returning any failure to the caller.
    pub fn try_persist(&self) -> Result<(), StorageError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let _guard = lock(&self.write_lock, "snapshot write");
        let jobs = self.list_all();
        snapshot::write_snapshot(path, &jobs)
    }

    /// Writes the snapshot. Failures are logged and never propagate.
    pub fn persist(&self) {
        if let Err(e) = self.try_persist() {
            log::error!("Failed to persist job snapshot: {}", e);
        }
    }
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn sort_jobs(jobs: &mut [Arc<JobRecord>]) {
    jobs.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}
