//! Shared fixtures for walletgen integration tests.
//!
//! - `TestHarness`: temp data dir plus a controller wired to it
//! - `FakeDeriver` / `BlockingDeriver` / `GateDeriver`: deterministic
//!   derivation; `ChunkBlocker` makes a later CSV chunk unwritable
//! - `RecordingSink`: keeps every status line and the contents of every
//!   delivered archive (the job removes its files right after delivery)

#![allow(dead_code)]

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use walletgen::jobs::{BulkWorker, JobController, JobLimits, JobStore, ProgressSink, WorkerSettings};
use walletgen::{Chain, DeriveError, Deriver, SinkError, WalletInfo, WalletProfiles};

pub const ADMIN: i64 = 99;

pub struct TestHarness {
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.child("jobs.json").path().to_path_buf()
    }

    pub fn work_root(&self) -> PathBuf {
        self.dir.child("work").path().to_path_buf()
    }

    pub fn work_dir(&self, chain: Chain, id: &str) -> PathBuf {
        self.work_root()
            .join(format!("bulkzip_{}_{}", chain.symbol(), id))
    }

    /// True once a job's working directory is gone.
    pub fn work_dir_removed(&self, chain: Chain, id: &str) -> bool {
        !self
            .dir
            .child("work")
            .child(format!("bulkzip_{}_{}", chain.symbol(), id))
            .path()
            .exists()
    }

    pub fn open_store(&self) -> Arc<JobStore> {
        Arc::new(JobStore::open(self.snapshot_path()).expect("Failed to open job store"))
    }

    pub fn controller(
        &self,
        deriver: Arc<dyn Deriver>,
        profiles: Arc<dyn WalletProfiles>,
        settings: WorkerSettings,
        limits: JobLimits,
    ) -> JobController {
        let store = self.open_store();
        let worker = Arc::new(BulkWorker::new(
            deriver,
            profiles,
            Arc::clone(&store),
            self.work_root(),
            settings,
        ));
        JobController::new(store, worker, limits, [ADMIN], Duration::from_millis(20))
    }

    /// Small chunks, tight polling, default limits, no profile store.
    pub fn simple_controller(&self, deriver: Arc<dyn Deriver>) -> JobController {
        self.controller(
            deriver,
            Arc::new(walletgen::NoopProfiles),
            small_settings(10, 2),
            JobLimits::default(),
        )
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.snapshot_path()).expect("Failed to read snapshot");
        serde_json::from_str(&raw).expect("Snapshot is not JSON")
    }
}

pub fn small_settings(chunk_size: u64, csvs_per_archive: usize) -> WorkerSettings {
    WorkerSettings {
        chunk_size,
        csvs_per_archive,
        checkpoint_every: 5,
        profile_batch: 7,
        pause_poll: Duration::from_millis(5),
    }
}

/// Numbered wallets; optionally fails every `fail_every`-th call and sleeps
/// `delay` per call.
pub struct FakeDeriver {
    calls: AtomicU64,
    fail_every: u64,
    delay: Duration,
}

impl FakeDeriver {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            fail_every: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Deriver for FakeDeriver {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(DeriveError::KeyDerivation(format!("injected fault on call {n}")));
        }
        Ok(WalletInfo {
            chain,
            derivation_path: chain.derivation_path().to_string(),
            address: format!("{}-addr-{n}", chain.symbol().to_lowercase()),
            mnemonic: format!("word{n} word word word word word word word word word word word"),
        })
    }
}

/// Blocks its first call until [`BlockingDeriver::release`], then fails it.
/// Later calls succeed immediately.
pub struct BlockingDeriver {
    /// `(entered, released)`
    state: Mutex<(bool, bool)>,
    cond: Condvar,
    inner: FakeDeriver,
}

impl BlockingDeriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((false, false)),
            cond: Condvar::new(),
            inner: FakeDeriver::new(),
        }
    }

    /// Waits until the worker is parked inside the first call.
    pub fn wait_entered(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn release(&self) {
        self.state.lock().unwrap().1 = true;
        self.cond.notify_all();
    }
}

impl Deriver for BlockingDeriver {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
        let mut state = self.state.lock().unwrap();
        if !state.0 {
            state.0 = true;
            self.cond.notify_all();
            while !state.1 {
                state = self.cond.wait(state).unwrap();
            }
            return Err(DeriveError::KeyDerivation("held".to_string()));
        }
        drop(state);
        self.inner.derive(chain)
    }
}

/// Holds the `hold_at`-th call until [`GateDeriver::release`]. Every call
/// succeeds.
pub struct GateDeriver {
    hold_at: u64,
    /// `(entered, released)`
    state: Mutex<(bool, bool)>,
    cond: Condvar,
    inner: FakeDeriver,
}

impl GateDeriver {
    pub fn new(hold_at: u64) -> Self {
        Self {
            hold_at,
            state: Mutex::new((false, false)),
            cond: Condvar::new(),
            inner: FakeDeriver::new(),
        }
    }

    pub fn wait_entered(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn release(&self) {
        self.state.lock().unwrap().1 = true;
        self.cond.notify_all();
    }
}

impl Deriver for GateDeriver {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
        if self.inner.calls() + 1 == self.hold_at {
            let mut state = self.state.lock().unwrap();
            state.0 = true;
            self.cond.notify_all();
            while !state.1 {
                state = self.cond.wait(state).unwrap();
            }
        }
        self.inner.derive(chain)
    }
}

/// On the `on_call`-th call, puts a directory where the CSV named
/// `file_name` would go in every job work dir under `work_root`, so opening
/// that chunk fails.
pub struct ChunkBlocker {
    work_root: PathBuf,
    on_call: u64,
    file_name: String,
    inner: FakeDeriver,
}

impl ChunkBlocker {
    pub fn new(work_root: PathBuf, on_call: u64, file_name: impl Into<String>) -> Self {
        Self {
            work_root,
            on_call,
            file_name: file_name.into(),
            inner: FakeDeriver::new(),
        }
    }
}

impl Deriver for ChunkBlocker {
    fn derive(&self, chain: Chain) -> Result<WalletInfo, DeriveError> {
        if self.inner.calls() + 1 == self.on_call {
            for entry in std::fs::read_dir(&self.work_root).unwrap() {
                let dir = entry.unwrap().path();
                std::fs::create_dir_all(dir.join(&self.file_name)).unwrap();
            }
        }
        self.inner.derive(chain)
    }
}

#[derive(Debug, Clone)]
pub struct DeliveredFile {
    pub name: String,
    pub caption: String,
    /// `(entry name, entry text)` in archive order.
    pub entries: Vec<(String, String)>,
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
    files: Mutex<Vec<DeliveredFile>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn last_line(&self) -> Option<String> {
        self.lines.lock().unwrap().last().cloned()
    }

    pub fn files(&self) -> Vec<DeliveredFile> {
        self.files.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn update(&self, _job_id: &str, text: &str) -> Result<(), SinkError> {
        self.lines.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn deliver_file(&self, _job_id: &str, path: &Path, caption: &str) -> Result<(), SinkError> {
        let file = File::open(path).map_err(|e| SinkError::Delivery {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| SinkError::Unavailable(e.to_string()))?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| SinkError::Unavailable(e.to_string()))?;
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(|e| SinkError::Delivery {
                path: path.to_path_buf(),
                source: e,
            })?;
            entries.push((entry.name().to_string(), text));
        }
        self.files.lock().unwrap().push(DeliveredFile {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            caption: caption.to_string(),
            entries,
        });
        Ok(())
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

/// Data rows of a CSV body (header dropped).
pub fn data_rows(csv: &str) -> Vec<&str> {
    csv.lines().skip(1).collect()
}
