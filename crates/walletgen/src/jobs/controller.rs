//! Control surface for bulk jobs: submit, inspect, pause, resume, cancel.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::lock;
use super::progress::{render_final, ProgressReporter, ProgressSink, ReporterHandle};
use super::record::{JobRecord, JobStatus, JobSummary};
use super::store::JobStore;
use super::worker::{BulkWorker, JobOutcome};
use crate::chain::Chain;
use crate::error::JobError;

/// Upper bounds on a single job's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    /// Hard cap for everyone.
    pub max_count: u64,
    /// Cap for callers outside the admin list.
    pub max_nonadmin: u64,
}

impl JobLimits {
    pub fn cap_for(&self, is_admin: bool) -> u64 {
        if is_admin {
            self.max_count
        } else {
            self.max_nonadmin.min(self.max_count)
        }
    }
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_count: 1_000_000,
            max_nonadmin: 100_000,
        }
    }
}

/// Background state of a job started by this process.
#[derive(Default)]
struct JobRuntime {
    thread: Option<JoinHandle<JobStatus>>,
    subscribers: Vec<ReporterHandle>,
    finished: bool,
}

type Runtimes = Arc<Mutex<HashMap<String, JobRuntime>>>;

pub struct JobController {
    store: Arc<JobStore>,
    worker: Arc<BulkWorker>,
    limits: JobLimits,
    admins: HashSet<i64>,
    progress_interval: Duration,
    runtimes: Runtimes,
}

impl JobController {
    pub fn new(
        store: Arc<JobStore>,
        worker: Arc<BulkWorker>,
        limits: JobLimits,
        admins: impl IntoIterator<Item = i64>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            store,
            worker,
            limits,
            admins: admins.into_iter().collect(),
            progress_interval,
            runtimes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn is_admin(&self, user: i64) -> bool {
        self.admins.contains(&user)
    }

    /// Validates and registers a job, then starts it in the background.
    pub fn submit(
        &self,
        owner: i64,
        chain: &str,
        count: u64,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Arc<JobRecord>, JobError> {
        let chain: Chain = chain
            .parse()
            .map_err(|e: crate::chain::UnsupportedChain| JobError::UnsupportedChain(e.0))?;
        if count == 0 {
            return Err(JobError::InvalidCount);
        }
        let limit = self.limits.cap_for(self.is_admin(owner));
        if count > limit {
            return Err(JobError::QuotaExceeded {
                requested: count,
                limit,
            });
        }

        let job = self.store.create(owner, chain, count);
        self.store.persist();
        log::info!(
            "Job {} submitted by user {}: {} x {}",
            job.id(),
            owner,
            count,
            chain
        );

        if let Err(e) = self.start(Arc::clone(&job), sink) {
            job.fail(e.to_string());
            self.store.persist();
            return Err(e);
        }
        Ok(job)
    }

    /// Returns the job if `requester` owns it or is an admin.
    pub fn status(&self, id: &str, requester: i64) -> Result<Arc<JobRecord>, JobError> {
        self.store.get_for(id, requester, self.is_admin(requester))
    }

    /// Jobs visible to `requester`: their own, or all of them for admins.
    pub fn list(&self, requester: i64) -> Vec<JobSummary> {
        let jobs = if self.is_admin(requester) {
            self.store.list_all()
        } else {
            self.store.list_for_user(requester)
        };
        jobs.iter().map(|j| j.summary()).collect()
    }

    /// Pauses a running job. A paused or finished job is left as is.
    pub fn pause(&self, id: &str, requester: i64) -> Result<JobStatus, JobError> {
        let job = self.status(id, requester)?;
        if job.pause() {
            log::info!("Job {} pause requested by {}", id, requester);
            self.store.persist();
        }
        Ok(job.status())
    }

    /// Resumes a paused job. Anything else is left as is.
    pub fn resume(&self, id: &str, requester: i64) -> Result<JobStatus, JobError> {
        let job = self.status(id, requester)?;
        if job.resume() {
            log::info!("Job {} resumed by {}", id, requester);
            self.store.persist();
        }
        Ok(job.status())
    }

    /// Sets the stop signal. Repeated or late calls change nothing.
    pub fn cancel(&self, id: &str, requester: i64) -> Result<JobStatus, JobError> {
        let job = self.status(id, requester)?;
        if job.cancel() {
            log::info!("Job {} cancelled by {}", id, requester);
            self.store.persist();
        }
        Ok(job.status())
    }

    /// Stops every unfinished job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self
            .store
            .list_all()
            .iter()
            .filter(|job| job.cancel())
            .count();
        if cancelled > 0 {
            log::info!("Cancelled {} unfinished job(s)", cancelled);
            self.store.persist();
        }
        cancelled
    }

    /// Attaches another progress reporter to a job.
    ///
    /// A job that is no longer running gets its final line pushed at once.
    pub fn subscribe(
        &self,
        id: &str,
        requester: i64,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), JobError> {
        let job = self.status(id, requester)?;
        {
            let mut runtimes = lock(&self.runtimes, "job runtime");
            if let Some(runtime) = runtimes.get_mut(id).filter(|rt| !rt.finished) {
                let reporter =
                    ProgressReporter::new(Arc::clone(&job), Arc::clone(&sink), self.progress_interval)
                        .spawn()?;
                runtime.subscribers.push(reporter);
                return Ok(());
            }
        }
        if let Err(e) = sink.update(job.id(), &render_final(&job)) {
            log::warn!("Progress update for job {} failed: {}", job.id(), e);
        }
        Ok(())
    }

    /// Blocks until the job's background work, delivery and cleanup are over.
    ///
    /// Returns `None` for unknown ids. Jobs not started by this process, or
    /// already waited for, return their current status straight away.
    pub fn wait(&self, id: &str) -> Option<JobStatus> {
        let handle = lock(&self.runtimes, "job runtime")
            .get_mut(id)
            .and_then(|rt| rt.thread.take());
        if let Some(handle) = handle {
            match handle.join() {
                Ok(status) => return Some(status),
                Err(_) => log::error!("Runner thread for job {} panicked", id),
            }
        }
        self.store.get(id).map(|job| job.status())
    }

    fn start(&self, job: Arc<JobRecord>, sink: Arc<dyn ProgressSink>) -> Result<(), JobError> {
        let reporter = ProgressReporter::new(Arc::clone(&job), Arc::clone(&sink), self.progress_interval);
        let worker = Arc::clone(&self.worker);
        let store = Arc::clone(&self.store);
        let runtimes = Arc::clone(&self.runtimes);
        let id = job.id().to_string();

        // Held across the spawn so `wait` always finds the handle.
        let mut guard = lock(&self.runtimes, "job runtime");
        let handle = thread::Builder::new()
            .name(format!("bulk-{}", id))
            .spawn(move || run_job(job, worker, store, sink, reporter, runtimes))
            .map_err(|e| JobError::SpawnFailed(e.to_string()))?;
        guard.insert(
            id,
            JobRuntime {
                thread: Some(handle),
                ..JobRuntime::default()
            },
        );
        Ok(())
    }
}

/// Body of a job's background thread.
fn run_job(
    job: Arc<JobRecord>,
    worker: Arc<BulkWorker>,
    store: Arc<JobStore>,
    sink: Arc<dyn ProgressSink>,
    reporter: ProgressReporter,
    runtimes: Runtimes,
) -> JobStatus {
    let reporter = match reporter.spawn() {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Job {} runs without progress reports: {}", job.id(), e);
            None
        }
    };

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| worker.run(&job))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let error = format!("worker panicked: {}", panic_message(payload.as_ref()));
            log::error!("Job {} {}", job.id(), error);
            job.fail(error.clone());
            store.persist();
            JobOutcome::Failed {
                work_dir: job.output().work_dir,
                error,
            }
        }
    };

    if let Some(reporter) = reporter {
        reporter.finish();
    }
    let subscribers = {
        let mut runtimes = lock(&runtimes, "job runtime");
        let runtime = runtimes.entry(job.id().to_string()).or_default();
        runtime.finished = true;
        std::mem::take(&mut runtime.subscribers)
    };
    for subscriber in subscribers {
        subscriber.finish();
    }

    if job.status() == JobStatus::Done {
        for archive in outcome.archives() {
            let name = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let caption = format!("Backup: {}", name);
            if let Err(e) = sink.deliver_file(job.id(), archive, &caption) {
                log::warn!("Job {}: delivering {} failed: {}", job.id(), name, e);
            }
        }
    }

    match (&outcome, outcome.work_dir()) {
        (JobOutcome::Failed { .. }, Some(dir)) => {
            log::warn!(
                "Job {} failed, partial output kept in {}",
                job.id(),
                dir.display()
            );
        }
        (_, Some(dir)) => remove_work_dir(job.id(), dir),
        (_, None) => {}
    }

    store.persist();
    job.status()
}

fn remove_work_dir(id: &str, dir: &std::path::Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!(
                "Job {}: failed to remove work dir {}: {}",
                id,
                dir.display(),
                e
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
