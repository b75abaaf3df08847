//! Bulk wallet generation jobs.
//!
//! A job is registered in the [`JobStore`], executed by a [`BulkWorker`] on
//! its own thread, watched by a [`ProgressReporter`] and steered through the
//! [`JobController`].

pub mod controller;
pub mod progress;
pub mod record;
pub mod snapshot;
pub mod store;
pub mod worker;
pub mod writer;

use std::sync::{Mutex, MutexGuard};

pub use controller::{JobController, JobLimits};
pub use progress::{
    render_final, render_progress, NoopSink, ProgressReporter, ProgressSink, ReporterHandle,
};
pub use record::{JobOutput, JobRecord, JobStatus, JobSummary};
pub use snapshot::SnapshotEntry;
pub use store::JobStore;
pub use worker::{BulkWorker, JobOutcome, WorkerSettings};
pub use writer::{package_archives, CsvChunk, CSV_HEADER};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            log::warn!("{} lock was poisoned, recovering", what);
            poisoned.into_inner()
        }
    }
}
