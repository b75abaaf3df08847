pub mod broadcast;
pub mod chain;
pub mod config;
pub mod db;
pub mod derive;
pub mod error;
pub mod jobs;
pub mod limits;
pub mod profile;
pub mod seeds;
pub mod wallet;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use chain::{Chain, UnsupportedChain};
pub use config::{apply_env_overrides, load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use derive::{Bip39Deriver, Deriver, WalletInfo};
pub use error::{
    ConfigError, DeriveError, JobError, Result, SinkError, StorageError, WalletGenError,
};
pub use jobs::{
    BulkWorker, JobController, JobLimits, JobRecord, JobStatus, JobStore, JobSummary,
    ProgressSink, WorkerSettings,
};
pub use limits::RateLimiter;
pub use profile::{NoopProfiles, ProfileEntry, ProfileStore, SavedWallet, WalletProfiles};
pub use seeds::SeedCache;
pub use wallet::{GeneratedWallet, WalletService};
