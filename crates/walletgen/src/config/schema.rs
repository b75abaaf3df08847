use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::{JobLimits, WorkerSettings};

/// Runtime settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Holds `jobs.json`, `profiles.db` and, by default, the scratch root.
    pub data_dir: PathBuf,
    /// Scratch root for job working directories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    pub log_level: String,
    pub admin_user_ids: Vec<i64>,
    pub rate_limit_per_min: u32,
    pub seed_ttl_secs: u64,
    pub progress_interval_secs: u64,
    pub bulk: BulkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BulkConfig {
    pub csv_chunk: u64,
    pub zip_csvs: usize,
    pub max_nonadmin: u64,
    pub max_count: u64,
    pub checkpoint_every: u64,
    pub profile_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            work_dir: None,
            log_level: "info".to_string(),
            admin_user_ids: Vec::new(),
            rate_limit_per_min: 3,
            seed_ttl_secs: 180,
            progress_interval_secs: 2,
            bulk: BulkConfig::default(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        let worker = WorkerSettings::default();
        let limits = JobLimits::default();
        Self {
            csv_chunk: worker.chunk_size,
            zip_csvs: worker.csvs_per_archive,
            max_nonadmin: limits.max_nonadmin,
            max_count: limits.max_count,
            checkpoint_every: worker.checkpoint_every,
            profile_batch: worker.profile_batch,
        }
    }
}

impl Config {
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("profiles.db")
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("work"))
    }

    pub fn is_admin(&self, user: i64) -> bool {
        self.admin_user_ids.contains(&user)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            chunk_size: self.bulk.csv_chunk,
            csvs_per_archive: self.bulk.zip_csvs,
            checkpoint_every: self.bulk.checkpoint_every,
            profile_batch: self.bulk.profile_batch,
            ..WorkerSettings::default()
        }
    }

    pub fn job_limits(&self) -> JobLimits {
        JobLimits {
            max_count: self.bulk.max_count,
            max_nonadmin: self.bulk.max_nonadmin,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn seed_ttl(&self) -> Duration {
        Duration::from_secs(self.seed_ttl_secs)
    }
}
