//! CLI argument parsing with clap

use crate::config::SortConfig;
use crate::error::{Error, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

/// Sortwise - media library organizer engine
///
/// Sorts photos and videos into a folder hierarchy derived from their
/// metadata, skips byte-identical duplicates and journals every change so a
/// session can be undone. Progress and the final result are written to
/// stdout as one JSON object per line; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "sortwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output log format as JSON
    #[arg(long, global = true)]
    pub json_log: bool,

    /// Also write logs to this file
    #[arg(long, global = true, env = "SORTWISE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sort the configured folders
    Sort(SortArgs),

    /// Reverse a previous session from its journal
    Undo {
        /// Journal file written by the session
        journal: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SortArgs {
    /// JSON configuration payload, or `-` to read it from stdin
    #[arg(required_unless_present = "payload_file", conflicts_with = "payload_file")]
    pub payload: Option<String>,

    /// Read the payload from a JSON or TOML file instead
    #[arg(long, value_name = "PATH")]
    pub payload_file: Option<PathBuf>,
}

impl SortArgs {
    /// Decode the payload from whichever source was given
    pub fn load_config(&self) -> Result<SortConfig> {
        if let Some(path) = &self.payload_file {
            return SortConfig::load_from_file(path);
        }

        match self.payload.as_deref() {
            Some("-") => {
                let mut payload = String::new();
                std::io::stdin()
                    .read_to_string(&mut payload)
                    .map_err(|e| Error::Protocol(format!("cannot read payload from stdin: {}", e)))?;
                SortConfig::from_json(&payload)
            }
            Some(payload) => SortConfig::from_json(payload),
            None => Err(Error::Protocol("no payload given".into())),
        }
    }
}
