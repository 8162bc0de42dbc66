//! Sortwise - media library organizer engine
//!
//! Sorts photos and videos into a folder hierarchy derived from their
//! metadata:
//! - EXIF capture date, camera model, GPS location and orientation
//! - Movie header dates for videos, filename timestamps as a fallback
//! - Content fingerprints (xxh3) to skip byte-identical duplicates
//! - Live-photo pairs kept together
//! - Parallel metadata extraction with Rayon
//! - A durable journal of every change, replayable in reverse to undo a session

pub mod cli;
pub mod config;
pub mod conflict;
pub mod error;
pub mod execute;
pub mod hash;
pub mod journal;
pub mod metadata;
pub mod plan;
pub mod process;
pub mod report;
pub mod scan;
pub mod shutdown;
pub mod undo;

pub use cli::Cli;
pub use config::{
    ConflictResolution, DateGranularity, FileOperation, MonthFormat, SortConfig, SortOptions,
};
pub use error::{Error, Result};
pub use process::Processor;
pub use report::{Reporter, ResultRecord, SessionSummary, Status};
pub use undo::{UndoReport, undo_session};
