//! The generation loop behind every bulk job.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::derive::Deriver;
use crate::error::StorageError;
use crate::profile::{ProfileEntry, WalletProfiles};

use super::record::{JobRecord, JobStatus};
use super::store::JobStore;
use super::writer::{package_archives, CsvChunk};

/// Tunables for the generation loop.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Rows per CSV file.
    pub chunk_size: u64,
    /// CSV files per ZIP archive.
    pub csvs_per_archive: usize,
    /// Snapshot cadence in written rows.
    pub checkpoint_every: u64,
    /// Profile rows buffered before a batch insert.
    pub profile_batch: usize,
    /// Upper bound on how long a paused worker sleeps between signal checks.
    pub pause_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            csvs_per_archive: 10,
            checkpoint_every: 5_000,
            profile_batch: 5_000,
            pause_poll: Duration::from_millis(100),
        }
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done {
        work_dir: PathBuf,
        archives: Vec<PathBuf>,
    },
    Cancelled {
        work_dir: PathBuf,
    },
    Failed {
        work_dir: Option<PathBuf>,
        error: String,
    },
}

impl JobOutcome {
    pub fn work_dir(&self) -> Option<&Path> {
        match self {
            JobOutcome::Done { work_dir, .. } | JobOutcome::Cancelled { work_dir } => {
                Some(work_dir)
            }
            JobOutcome::Failed { work_dir, .. } => work_dir.as_deref(),
        }
    }

    pub fn archives(&self) -> &[PathBuf] {
        match self {
            JobOutcome::Done { archives, .. } => archives,
            _ => &[],
        }
    }
}

/// Executes jobs: derive, write rows, package, report a terminal status.
///
/// The worker owns a job's `processed` counter and its transitions to
/// `done`/`cancelled`/`failed`. Delivering archives and removing the working
/// directory are left to the caller.
pub struct BulkWorker {
    deriver: Arc<dyn Deriver>,
    profiles: Arc<dyn WalletProfiles>,
    store: Arc<JobStore>,
    work_root: PathBuf,
    settings: WorkerSettings,
}

impl BulkWorker {
    pub fn new(
        deriver: Arc<dyn Deriver>,
        profiles: Arc<dyn WalletProfiles>,
        store: Arc<JobStore>,
        work_root: impl Into<PathBuf>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            deriver,
            profiles,
            store,
            work_root: work_root.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Working directory a job writes into.
    pub fn work_dir_for(&self, job: &JobRecord) -> PathBuf {
        self.work_root
            .join(format!("bulkzip_{}_{}", job.chain().symbol(), job.id()))
    }

    pub fn run(&self, job: &JobRecord) -> JobOutcome {
        let span = tracing::info_span!(
            "bulk_job",
            job_id = %job.id(),
            chain = %job.chain(),
            count = job.count()
        );
        let _enter = span.enter();

        log::info!(
            "Job {} started: {} x {} for user {}",
            job.id(),
            job.count(),
            job.chain(),
            job.owner()
        );

        let work_dir = match self.prepare_work_dir(job) {
            Ok(dir) => dir,
            Err(e) => return self.failed(job, None, e),
        };
        job.set_work_dir(work_dir.clone());

        let mut batch = Vec::with_capacity(self.settings.profile_batch.min(16_384));
        let generated = self.generate(job, &work_dir, &mut batch);
        self.flush_profiles(job, &mut batch);

        let csvs = match generated {
            Ok(csvs) => csvs,
            Err(e) => return self.failed(job, Some(work_dir), e),
        };

        if job.is_stopped() {
            return self.cancelled(job, work_dir);
        }
        job.seal();

        let archives = match package_archives(
            &work_dir,
            job.chain(),
            &csvs,
            self.settings.csvs_per_archive,
        ) {
            Ok(archives) => archives,
            Err(e) => return self.failed(job, Some(work_dir), e),
        };
        job.set_archives(archives.clone());

        if !job.transition(JobStatus::Done) {
            // Cancelled between the last row and the end of packaging.
            return self.cancelled(job, work_dir);
        }
        self.store.persist();

        log::info!(
            "Job {} done: {}/{} written, {} skipped, {} archive(s)",
            job.id(),
            job.processed(),
            job.count(),
            job.skipped(),
            archives.len()
        );
        JobOutcome::Done { work_dir, archives }
    }

    fn prepare_work_dir(&self, job: &JobRecord) -> Result<PathBuf, StorageError> {
        let dir = self.work_dir_for(job);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    /// Writes CSV chunks until the count is reached or the job is stopped.
    ///
    /// A write failure still closes the current chunk so rows already
    /// written reach the disk before the error is returned.
    fn generate(
        &self,
        job: &JobRecord,
        work_dir: &Path,
        batch: &mut Vec<ProfileEntry>,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let chain = job.chain();
        let count = job.count();
        let chunk_size = self.settings.chunk_size.max(1);
        let checkpoint_every = self.settings.checkpoint_every.max(1);

        let mut csvs = Vec::new();
        let mut next = 0u64;

        while next < count {
            if self.should_stop(job) {
                break;
            }

            let len = chunk_size.min(count - next);
            let mut chunk = CsvChunk::create(work_dir, chain, next, len)?;
            let mut write_error = None;
            let mut stopped = false;

            for index in next..next + len {
                if self.should_stop(job) {
                    stopped = true;
                    break;
                }
                let wallet = match self.deriver.derive(chain) {
                    Ok(wallet) => wallet,
                    Err(e) => {
                        job.record_skip();
                        log::warn!("Job {}: row {} skipped: {}", job.id(), index, e);
                        continue;
                    }
                };
                if let Err(e) = chunk.write_row(index, &wallet) {
                    write_error = Some(e);
                    break;
                }
                job.record_row();

                batch.push(ProfileEntry::from(&wallet));
                if batch.len() >= self.settings.profile_batch {
                    self.flush_profiles(job, batch);
                }
                if job.processed() % checkpoint_every == 0 {
                    self.store.persist();
                }
            }

            let (path, rows) = chunk.finish()?;
            log::debug!("Job {}: closed {} with {} row(s)", job.id(), path.display(), rows);
            csvs.push(path);

            if let Some(e) = write_error {
                return Err(e);
            }
            if stopped {
                break;
            }
            next += len;
        }

        Ok(csvs)
    }

    /// Honours the pause and stop signals. Returns `true` when the job must stop.
    fn should_stop(&self, job: &JobRecord) -> bool {
        if job.is_stopped() {
            return true;
        }
        if job.is_paused() {
            job.transition_from(JobStatus::Running, JobStatus::Paused);
            log::info!(
                "Job {} paused at {}/{}",
                job.id(),
                job.processed(),
                job.count()
            );
            if job.wait_while_paused(self.settings.pause_poll) {
                return true;
            }
            job.transition_from(JobStatus::Paused, JobStatus::Running);
            log::info!("Job {} resumed", job.id());
        }
        false
    }

    fn flush_profiles(&self, job: &JobRecord, batch: &mut Vec<ProfileEntry>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.profiles.add_many(job.owner(), batch) {
            log::warn!(
                "Job {}: failed to save {} profile entries: {}",
                job.id(),
                batch.len(),
                e
            );
        }
        batch.clear();
    }

    fn cancelled(&self, job: &JobRecord, work_dir: PathBuf) -> JobOutcome {
        job.transition(JobStatus::Cancelled);
        self.store.persist();
        log::info!(
            "Job {} cancelled at {}/{}",
            job.id(),
            job.processed(),
            job.count()
        );
        JobOutcome::Cancelled { work_dir }
    }

    fn failed(&self, job: &JobRecord, work_dir: Option<PathBuf>, error: StorageError) -> JobOutcome {
        let error = error.to_string();
        log::error!(
            "Job {} failed at {}/{}: {}",
            job.id(),
            job.processed(),
            job.count(),
            error
        );
        job.fail(error.clone());
        self.store.persist();
        JobOutcome::Failed { work_dir, error }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::chain::Chain;
    use crate::derive::WalletInfo;
    use crate::error::DeriveError;
    use crate::profile::NoopProfiles;

    /// Fails every `nth` call.
    struct FlakyDeriver {
        calls: AtomicU64,
        nth: u64,
    }

    impl Deriver for FlakyDeriver {
        fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.nth > 0 && n % self.nth == 0 {
                return Err(DeriveError::KeyDerivation(format!("injected fault {n}")));
            }
            Ok(WalletInfo {
                chain,
                derivation_path: chain.derivation_path().to_string(),
                address: format!("addr{n}"),
                mnemonic: format!("mnemonic {n}"),
            })
        }
    }

    fn worker(root: &Path, nth: u64, settings: WorkerSettings) -> BulkWorker {
        BulkWorker::new(
            Arc::new(FlakyDeriver {
                calls: AtomicU64::new(0),
                nth,
            }),
            Arc::new(NoopProfiles),
            Arc::new(JobStore::in_memory()),
            root,
            settings,
        )
    }

    fn small() -> WorkerSettings {
        WorkerSettings {
            chunk_size: 4,
            csvs_per_archive: 2,
            ..WorkerSettings::default()
        }
    }

    #[test]
    fn test_chunks_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), 0, small());
        let job = JobRecord::new("job00001", 1, Chain::Eth, 10);

        let (work_dir, archives) = match worker.run(&job) {
            JobOutcome::Done { work_dir, archives } => (work_dir, archives),
            other => panic!("expected done, got {other:?}"),
        };
        assert_eq!(job.status(), JobStatus::Done);
        assert_eq!(job.processed(), 10);
        assert!(work_dir.ends_with("bulkzip_ETH_job00001"));
        assert!(work_dir.join("wallets_ETH_0_3.csv").exists());
        assert!(work_dir.join("wallets_ETH_4_7.csv").exists());
        assert!(work_dir.join("wallets_ETH_8_9.csv").exists());
        assert_eq!(archives.len(), 2);
        assert_eq!(job.output().archives, archives);
    }

    #[test]
    fn test_derivation_faults_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), 3, small());
        let job = JobRecord::new("job00002", 1, Chain::Btc, 9);

        let outcome = worker.run(&job);
        assert!(matches!(outcome, JobOutcome::Done { .. }));
        assert_eq!(job.processed(), 6);
        assert_eq!(job.skipped(), 3);

        let csv = fs::read_to_string(worker.work_dir_for(&job).join("wallets_BTC_0_3.csv")).unwrap();
        let indices: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(indices, vec!["0", "1", "3"]);
    }

    #[test]
    fn test_stop_before_start_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path(), 0, small());
        let job = JobRecord::new("job00003", 1, Chain::Sol, 10);
        job.cancel();

        let outcome = worker.run(&job);
        let JobOutcome::Cancelled { work_dir } = outcome else {
            panic!("expected cancelled");
        };
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.processed(), 0);
        assert_eq!(fs::read_dir(&work_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_unwritable_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let worker = worker(&blocker, 0, small());
        let job = JobRecord::new("job00004", 1, Chain::Eth, 2);

        let outcome = worker.run(&job);
        assert!(matches!(outcome, JobOutcome::Failed { work_dir: None, .. }));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().is_some());
    }

    /// Pauses `job` from inside the `on_call`-th derivation.
    struct PausingDeriver {
        job: Arc<JobRecord>,
        on_call: u64,
        calls: AtomicU64,
    }

    impl Deriver for PausingDeriver {
        fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.on_call {
                self.job.pause();
            }
            Ok(WalletInfo {
                chain,
                derivation_path: chain.derivation_path().to_string(),
                address: format!("addr{n}"),
                mnemonic: format!("mnemonic {n}"),
            })
        }
    }

    #[test]
    fn test_pause_after_last_row_still_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let job = Arc::new(JobRecord::new("job00005", 1, Chain::Eth, 3));
        let worker = BulkWorker::new(
            Arc::new(PausingDeriver {
                job: Arc::clone(&job),
                on_call: 3,
                calls: AtomicU64::new(0),
            }),
            Arc::new(NoopProfiles),
            Arc::new(JobStore::in_memory()),
            dir.path(),
            small(),
        );

        let outcome = worker.run(&job);
        assert!(matches!(outcome, JobOutcome::Done { .. }));
        assert_eq!(job.status(), JobStatus::Done);
        assert_eq!(job.processed(), 3);
        assert!(!job.is_paused());
    }
}
