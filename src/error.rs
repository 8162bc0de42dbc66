//! Error types for the sorting engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read EXIF data from {path}: {message}")]
    ExifRead { path: PathBuf, message: String },

    #[error("Failed to extract video metadata from {path}: {message}")]
    VideoMetadata { path: PathBuf, message: String },

    #[error("File hash computation failed for {path}: {message}")]
    HashComputation { path: PathBuf, message: String },

    #[error("Invalid configuration payload: {0}")]
    Protocol(String),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Journal error in {path}: {message}")]
    Journal { path: PathBuf, message: String },

    #[error("Could not find a free name for {path}")]
    NoFreeName { path: PathBuf },

    #[error("Copy of {source_path} to {dest} is incomplete: expected {expected} bytes, found {actual}")]
    IncompleteCopy {
        source_path: PathBuf,
        dest: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error means the caller sent a payload we refuse to run
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
