use std::path::PathBuf;
use thiserror::Error;

use crate::chain::Chain;

#[derive(Error, Debug)]
pub enum WalletGenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Derivation error: {0}")]
    Derive(#[from] DeriveError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Rate limit exceeded, try again in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },
}

/// Errors returned synchronously by the job controller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("Unsupported chain '{0}'")]
    UnsupportedChain(String),

    #[error("Requested {requested} wallets but the limit is {limit}")]
    QuotaExceeded { requested: u64, limit: u64 },

    #[error("Count must be a positive integer")]
    InvalidCount,

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {0} belongs to another user")]
    Forbidden(String),

    #[error("Failed to spawn job worker: {0}")]
    SpawnFailed(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize job snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("Mnemonic generation failed: {0}")]
    Mnemonic(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Address encoding failed: {0}")]
    Encoding(String),

    #[error("Unsupported chain for derivation: {0}")]
    UnsupportedChain(Chain),
}

/// Failure reported by a progress sink. Callers log and drop it.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to deliver '{path}': {source}")]
    Delivery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WalletGenError>;
