//! The mutable state of one bulk-generation job.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lock;
use crate::chain::Chain;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Paused,
    Cancelled,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Cancelled | JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pause and stop flags shared between the controller and the worker.
///
/// Flags are atomics so the per-row check stays lock-free; the mutex only
/// pairs with the condvar so a paused worker never misses a wake-up.
#[derive(Default)]
struct JobSignals {
    paused: AtomicBool,
    stop: AtomicBool,
    /// Set once every row has been attempted; pausing is refused after that.
    sealed: AtomicBool,
    gate: Mutex<()>,
    wake: Condvar,
}

impl JobSignals {
    fn set(&self, flag: &AtomicBool, value: bool) {
        let _guard = lock(&self.gate, "job signal");
        flag.store(value, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

/// Files a job produced or is producing.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    pub work_dir: Option<PathBuf>,
    pub archives: Vec<PathBuf>,
    pub error: Option<String>,
}

/// Lightweight listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub chain: Chain,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
}

/// One bulk-generation request.
///
/// `processed` and `skipped` are only advanced by the worker that owns the
/// job. The controller flips the signals and the running/paused status.
pub struct JobRecord {
    id: String,
    owner: i64,
    chain: Chain,
    count: u64,
    created_at: DateTime<Utc>,
    processed: AtomicU64,
    skipped: AtomicU64,
    status: Mutex<JobStatus>,
    signals: JobSignals,
    output: Mutex<JobOutput>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, owner: i64, chain: Chain, count: u64) -> Self {
        Self::restored(id, owner, chain, count, 0, JobStatus::Running, Utc::now())
    }

    pub(crate) fn restored(
        id: impl Into<String>,
        owner: i64,
        chain: Chain,
        count: u64,
        processed: u64,
        status: JobStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner,
            chain,
            count,
            created_at,
            processed: AtomicU64::new(processed.min(count)),
            skipped: AtomicU64::new(0),
            status: Mutex::new(status),
            signals: JobSignals::default(),
            output: Mutex::new(JobOutput::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> i64 {
        self.owner
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Derivation attempts that failed and were left out of the output.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        *lock(&self.status, "job status")
    }

    pub fn output(&self) -> JobOutput {
        lock(&self.output, "job output").clone()
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.output, "job output").error.clone()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            chain: self.chain,
            status: self.status(),
            processed: self.processed(),
            total: self.count,
        }
    }

    /// Integer percentage of rows written, rounded down.
    pub fn percent(&self) -> u64 {
        if self.count == 0 {
            return 0;
        }
        self.processed() * 100 / self.count
    }

    pub fn is_paused(&self) -> bool {
        self.signals.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.signals.stop.load(Ordering::SeqCst)
    }

    /// Moves to `to` unless the job already reached a terminal status.
    pub(crate) fn transition(&self, to: JobStatus) -> bool {
        let mut status = lock(&self.status, "job status");
        if status.is_terminal() {
            return false;
        }
        *status = to;
        true
    }

    /// Moves to `to` only while the status is exactly `from`.
    pub(crate) fn transition_from(&self, from: JobStatus, to: JobStatus) -> bool {
        let mut status = lock(&self.status, "job status");
        if *status != from {
            return false;
        }
        *status = to;
        true
    }

    /// Sets the pause signal if the job is running. Returns whether it paused.
    pub(crate) fn pause(&self) -> bool {
        let mut status = lock(&self.status, "job status");
        if *status != JobStatus::Running || self.signals.sealed.load(Ordering::SeqCst) {
            return false;
        }
        self.signals.set(&self.signals.paused, true);
        *status = JobStatus::Paused;
        true
    }

    /// Clears the pause signal if the job is paused. Returns whether it resumed.
    pub(crate) fn resume(&self) -> bool {
        let mut status = lock(&self.status, "job status");
        if *status != JobStatus::Paused {
            return false;
        }
        self.signals.set(&self.signals.paused, false);
        *status = JobStatus::Running;
        true
    }

    /// Sets the stop signal and marks the job cancelled.
    ///
    /// Terminal jobs are left untouched. Returns whether anything changed.
    pub(crate) fn cancel(&self) -> bool {
        let mut status = lock(&self.status, "job status");
        if status.is_terminal() {
            return false;
        }
        self.signals.set(&self.signals.stop, true);
        *status = JobStatus::Cancelled;
        true
    }

    /// Marks row generation as finished.
    ///
    /// A pause that arrived after the last row check is undone, so the job
    /// goes straight from `running` to a terminal status.
    pub(crate) fn seal(&self) {
        let mut status = lock(&self.status, "job status");
        self.signals.sealed.store(true, Ordering::SeqCst);
        if *status == JobStatus::Paused {
            self.signals.set(&self.signals.paused, false);
            *status = JobStatus::Running;
        }
    }

    /// Blocks while the pause signal is set. Returns `true` once stopped.
    pub(crate) fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut guard = lock(&self.signals.gate, "job signal");
        while self.is_paused() && !self.is_stopped() {
            guard = match self.signals.wake.wait_timeout(guard, poll) {
                Ok((g, _)) => g,
                Err(poisoned) => {
                    log::warn!("Job signal lock was poisoned, recovering");
                    poisoned.into_inner().0
                }
            };
        }
        self.is_stopped()
    }

    pub(crate) fn record_row(&self) {
        let previous = self.processed.fetch_add(1, Ordering::SeqCst);
        debug_assert!(previous < self.count, "processed would exceed count");
    }

    pub(crate) fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_work_dir(&self, dir: PathBuf) {
        lock(&self.output, "job output").work_dir = Some(dir);
    }

    pub(crate) fn set_archives(&self, archives: Vec<PathBuf>) {
        lock(&self.output, "job output").archives = archives;
    }

    /// Records `message` and moves to `failed` unless already terminal.
    pub(crate) fn fail(&self, message: impl Into<String>) -> bool {
        lock(&self.output, "job output").error = Some(message.into());
        self.transition(JobStatus::Failed)
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("chain", &self.chain)
            .field("count", &self.count)
            .field("processed", &self.processed())
            .field("status", &self.status())
            .finish()
    }
}
