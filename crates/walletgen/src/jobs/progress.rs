use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::record::{JobRecord, JobStatus};
use crate::error::{JobError, SinkError};

/// Where job progress and finished archives go.
///
/// Both calls are best-effort: callers log failures and carry on.
pub trait ProgressSink: Send + Sync {
    /// Replaces the job's status line.
    fn update(&self, job_id: &str, text: &str) -> Result<(), SinkError>;

    /// Hands a finished file to the requester.
    fn deliver_file(&self, job_id: &str, path: &Path, caption: &str) -> Result<(), SinkError>;
}

/// Sink that drops everything.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn update(&self, _job_id: &str, _text: &str) -> Result<(), SinkError> {
        Ok(())
    }

    fn deliver_file(&self, _job_id: &str, _path: &Path, _caption: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// `Job <id> [<status>] Processed: <p>/<n> (<pct>%).`
pub fn render_progress(job: &JobRecord) -> String {
    format!(
        "Job {} [{}] Processed: {}/{} ({}%).",
        job.id(),
        job.status(),
        job.processed(),
        job.count(),
        job.percent()
    )
}

/// Terminal line: adds skipped rows and the failure reason when present.
pub fn render_final(job: &JobRecord) -> String {
    let status = job.status();
    let mut line = format!(
        "Job {} [{}] Processed: {}/{}.",
        job.id(),
        status,
        job.processed(),
        job.count()
    );
    let skipped = job.skipped();
    if skipped > 0 {
        line.push_str(&format!(" Skipped: {}.", skipped));
    }
    if status == JobStatus::Failed {
        if let Some(error) = job.error() {
            line.push_str(&format!(" Error: {}", error));
        }
    }
    line
}

/// Periodically pushes a job's progress line to a sink.
pub struct ProgressReporter {
    job: Arc<JobRecord>,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    last_reported: Option<u64>,
}

impl ProgressReporter {
    pub fn new(job: Arc<JobRecord>, sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        Self {
            job,
            sink,
            interval,
            last_reported: None,
        }
    }

    /// Starts the reporter on its own thread.
    pub fn spawn(mut self) -> Result<ReporterHandle, JobError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let name = format!("progress-{}", self.job.id());
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => self.tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                self.push(&render_final(&self.job));
            })
            .map_err(|e| JobError::SpawnFailed(e.to_string()))?;

        Ok(ReporterHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn tick(&mut self) {
        let processed = self.job.processed();
        if self.last_reported != Some(processed) {
            self.last_reported = Some(processed);
            self.push(&render_progress(&self.job));
        }
    }

    fn push(&self, text: &str) {
        if let Err(e) = self.sink.update(self.job.id(), text) {
            log::warn!("Progress update for job {} failed: {}", self.job.id(), e);
        }
    }
}

/// Stops a running reporter. Finishing triggers the final push.
pub struct ReporterHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Signals the reporter and waits for its final push.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Progress reporter thread panicked");
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
