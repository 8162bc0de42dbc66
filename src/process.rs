//! Sort session controller
//!
//! Handles the core pipeline of:
//! - Validating the selected folders and opening the journal
//! - Scanning input folders
//! - Extracting metadata and fingerprints in parallel with Rayon
//! - Skipping duplicates and pairing live photos in scan order
//! - Planning, resolving and executing each unit, one at a time
//!
//! Everything after extraction is strictly sequential so the journal order
//! matches the order mutations happened in.

use crate::config::SortConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::error::{Error, Result};
use crate::execute::{Executor, TransferRequest};
use crate::hash::{DedupOutcome, DeduplicationIndex, compute_fingerprint};
use crate::journal::{JournalWriter, SessionHeader};
use crate::metadata::{self, FileRecord, MediaKind};
use crate::plan::PathPlanner;
use crate::report::{Reporter, ResultRecord, SessionSummary, Status};
use crate::scan::{self, ScannedFile};
use crate::shutdown;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{Level, debug, error, info, span, warn};

/// One step of the session: progress advances once per unit
#[derive(Debug)]
enum Unit {
    /// Nothing to do besides counting
    Skip { path: PathBuf, reason: SkipReason },
    Single(Box<FileRecord>),
    /// Still image and motion clip moved together
    Pair {
        still: Box<FileRecord>,
        clip: Box<FileRecord>,
    },
}

impl Unit {
    /// Number of discovered files the unit covers
    fn weight(&self) -> usize {
        match self {
            Unit::Pair { .. } => 2,
            _ => 1,
        }
    }
}

#[derive(Debug)]
enum SkipReason {
    Unsupported,
    Duplicate { canonical: PathBuf },
    Failed(Error),
}

/// Main processor for one sort invocation
pub struct Processor {
    config: SortConfig,
    cancel_check: fn() -> bool,
}

impl Processor {
    /// Create a new processor with the given configuration
    pub fn new(config: SortConfig) -> Self {
        Self {
            config,
            cancel_check: shutdown::is_requested,
        }
    }

    /// Replace the cancellation source, checked before every unit
    pub fn with_cancel_check(mut self, cancel_check: fn() -> bool) -> Self {
        self.cancel_check = cancel_check;
        self
    }

    /// Run the session, writing progress to `reporter`. The returned record
    /// is the final result; the caller emits it.
    pub fn run<W: Write>(&self, reporter: &mut Reporter<W>) -> ResultRecord {
        let _span = span!(Level::INFO, "processor_run").entered();

        let (roots, pool, mut journal) = match self.setup() {
            Ok(ready) => ready,
            Err(e) => {
                error!(error = %e, "Session setup failed");
                return ResultRecord::error(e.to_string());
            }
        };

        let mut exclude = self.config.exclude.clone();
        if let Some(journal_dir) = journal.path().parent() {
            exclude.push(journal_dir.to_path_buf());
        }
        info!("Scanning input folders...");
        let files = scan::scan_folders(&roots, &exclude);
        let total = files.len();

        info!(files = total, threads = pool.current_num_threads(), "Extracting metadata...");
        let extracted: Vec<(PathBuf, Result<FileRecord>)> = pool.install(|| {
            files
                .par_iter()
                .map(|file| (file.path.clone(), self.extract(file)))
                .collect()
        });

        let units = self.build_units(extracted);
        let mut resolver = ConflictResolver::new(self.config.conflict_resolution);
        resolver.protect_sources(units.iter().flat_map(|unit| match unit {
            Unit::Skip { .. } => vec![],
            Unit::Single(record) => vec![record.path.clone()],
            Unit::Pair { still, clip } => vec![still.path.clone(), clip.path.clone()],
        }));

        let mut session = SessionRun {
            planner: PathPlanner::new(&self.config),
            executor: Executor::new(self.config.file_operation),
            resolver,
            journal: &mut journal,
            summary: SessionSummary::default(),
        };

        let mut done = 0usize;
        let mut cancelled = false;
        let mut fatal = None;
        info!(units = units.len(), "Processing files...");

        for unit in units {
            if (self.cancel_check)() {
                warn!(done, total, "Cancellation requested, stopping before next file");
                cancelled = true;
                break;
            }

            done += unit.weight();
            if let Err(e) = session.process_unit(unit) {
                error!(error = %e, "Journal write failed, stopping session");
                fatal = Some(e);
                break;
            }

            if let Err(e) = reporter.progress(done, total) {
                warn!(error = %e, "Could not write progress record");
            }
        }

        let summary = session.summary;
        let journal_path = journal.path().to_path_buf();
        let (status, message) = match fatal {
            Some(e) => (Status::Error, format!("{}; {}", e, summary.message())),
            None if cancelled => (Status::Cancelled, format!("Cancelled. {}", summary.message())),
            None => {
                if let Err(e) = reporter.complete() {
                    warn!(error = %e, "Could not write progress record");
                }
                let status = if summary.errors > 0 {
                    Status::Partial
                } else {
                    Status::Success
                };
                (status, summary.message())
            }
        };

        info!(status = ?status, journal = ?journal_path, "{}", summary.message());
        ResultRecord {
            status,
            message,
            journal: Some(journal_path),
            summary: Some(summary),
            undo: None,
        }
    }

    /// Checks that must pass before anything on disk changes
    fn setup(&self) -> Result<(Vec<PathBuf>, rayon::ThreadPool, JournalWriter)> {
        let roots = scan::validate_folders(&self.config.folders)?;
        if let Some(destination) = &self.config.destination
            && destination.exists()
            && !destination.is_dir()
        {
            return Err(Error::Setup(format!(
                "destination '{}' is not a directory",
                destination.display()
            )));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| Error::Setup(format!("could not start worker threads: {}", e)))?;

        // Canonical, like the roots, so the scan can exclude it by prefix
        let journal_dir = self.config.journal_dir();
        let journal_dir = fs::create_dir_all(&journal_dir)
            .and_then(|_| fs::canonicalize(&journal_dir))
            .map_err(|e| {
                Error::Setup(format!(
                    "cannot create journal directory '{}': {}",
                    journal_dir.display(),
                    e
                ))
            })?;

        let options = serde_json::to_value(&self.config).unwrap_or_default();
        let journal = JournalWriter::create(&journal_dir, SessionHeader::new(options))?;
        Ok((roots, pool, journal))
    }

    /// Attributes plus, when deduplicating, the content fingerprint
    fn extract(&self, file: &ScannedFile) -> Result<FileRecord> {
        let _span = span!(Level::DEBUG, "extract", path = ?file.path).entered();
        let mut record = metadata::extract(&file.path, &file.root, &self.config.sort_options)?;
        if self.config.sort_options.deduplication && record.attributes.kind.is_supported() {
            record.fingerprint = Some(compute_fingerprint(&file.path)?);
        }
        Ok(record)
    }

    /// Deduplicate in scan order, then pair live photos among what is left
    fn build_units(&self, extracted: Vec<(PathBuf, Result<FileRecord>)>) -> Vec<Unit> {
        let mut index = DeduplicationIndex::new();
        let mut units: Vec<Option<Unit>> = extracted
            .into_iter()
            .map(|(path, result)| {
                let record = match result {
                    Ok(record) => record,
                    Err(e) => {
                        return Unit::Skip {
                            path,
                            reason: SkipReason::Failed(e),
                        };
                    }
                };
                if !record.attributes.kind.is_supported() {
                    return Unit::Skip {
                        path,
                        reason: SkipReason::Unsupported,
                    };
                }
                if let Some(fingerprint) = record.fingerprint
                    && let DedupOutcome::Duplicate { canonical } = index.observe(fingerprint, &path)
                {
                    return Unit::Skip {
                        path,
                        reason: SkipReason::Duplicate { canonical },
                    };
                }
                Unit::Single(Box::new(record))
            })
            .map(Some)
            .collect();

        if self.config.sort_options.live_photos {
            pair_live_photos(&mut units);
        }

        units.into_iter().flatten().collect()
    }
}

/// Merge the first still and first clip of each live-photo group into one
/// unit at the position of whichever came first
fn pair_live_photos(units: &mut [Option<Unit>]) {
    let mut groups: HashMap<String, (Option<usize>, Option<usize>)> = HashMap::new();
    for (i, unit) in units.iter().enumerate() {
        let Some(Unit::Single(record)) = unit else {
            continue;
        };
        let Some(key) = record.attributes.live_photo_key.clone() else {
            continue;
        };
        let slot = groups.entry(key).or_default();
        match record.attributes.kind {
            MediaKind::Photo | MediaKind::Raw if slot.0.is_none() => slot.0 = Some(i),
            MediaKind::Video if slot.1.is_none() => slot.1 = Some(i),
            _ => {}
        }
    }

    let mut pairs: Vec<(usize, usize)> = groups
        .into_values()
        .filter_map(|slot| match slot {
            (Some(still), Some(clip)) => Some((still, clip)),
            _ => None,
        })
        .collect();
    pairs.sort_unstable();

    for (still_idx, clip_idx) in pairs {
        let (Some(Unit::Single(still)), Some(Unit::Single(clip))) =
            (units[still_idx].take(), units[clip_idx].take())
        else {
            continue;
        };
        debug!(still = ?still.path, clip = ?clip.path, "Paired live photo");
        units[still_idx.min(clip_idx)] = Some(Unit::Pair { still, clip });
    }
}

/// Mutable state of a running session
struct SessionRun<'j> {
    planner: PathPlanner,
    executor: Executor,
    resolver: ConflictResolver,
    journal: &'j mut JournalWriter,
    summary: SessionSummary,
}

impl SessionRun<'_> {
    /// Process one unit. Per-file failures are counted; only a journal
    /// failure is returned, since nothing after it could be undone.
    fn process_unit(&mut self, unit: Unit) -> Result<()> {
        match unit {
            Unit::Skip { path, reason } => {
                self.skip(&path, reason);
                Ok(())
            }
            Unit::Single(record) => {
                let _span = span!(Level::DEBUG, "process_file", path = ?record.path).entered();
                let segments = self.planner.segments(&record.attributes);
                self.place_group(&[&*record], &segments)
            }
            Unit::Pair { still, clip } => {
                let _span = span!(Level::DEBUG, "process_pair", still = ?still.path).entered();
                let segments = self.planner.pair_segments(&still.attributes);
                self.place_group(&[&*still, &*clip], &segments)
            }
        }
    }

    fn skip(&mut self, path: &Path, reason: SkipReason) {
        match reason {
            SkipReason::Unsupported => {
                debug!(?path, "Skipping unsupported file");
                self.summary.unsupported_skipped += 1;
            }
            SkipReason::Duplicate { canonical } => {
                info!(?path, ?canonical, "Skipping duplicate file");
                self.summary.duplicates_skipped += 1;
            }
            SkipReason::Failed(e) => {
                error!(?path, error = %e, "Failed to read file");
                self.summary.errors += 1;
            }
        }
    }

    /// Resolve and execute files that share one set of segments. The group
    /// lands together or not at all: when a member fails, the members already
    /// transferred are reverted and the whole group counts as failed.
    fn place_group(&mut self, records: &[&FileRecord], segments: &[String]) -> Result<()> {
        let mut members = Vec::with_capacity(records.len());
        for record in records {
            match self.planner.candidate(record, segments) {
                Some(candidate) => members.push((record.path.as_path(), candidate)),
                None => {
                    error!(path = ?record.path, "File has no name");
                    self.summary.errors += records.len();
                    return Ok(());
                }
            }
        }

        let resolutions = match self.resolver.resolve_group(&members) {
            Ok(resolutions) => resolutions,
            Err(e) => {
                error!(path = ?records[0].path, error = %e, "Failed to resolve destination");
                self.summary.errors += records.len();
                return Ok(());
            }
        };

        let mut done: Vec<(u64, &FileRecord, &Resolution)> = Vec::with_capacity(records.len());
        for (&record, resolution) in records.iter().zip(&resolutions) {
            match self.execute(record, resolution) {
                Ok(Some(seq)) => done.push((seq, record, resolution)),
                Ok(None) => {}
                Err(e @ Error::Journal { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        source = ?record.path,
                        destination = ?resolution.destination(),
                        error = %e,
                        "Failed to process file"
                    );
                    self.summary.errors += records.len();
                    return self.revert(&done);
                }
            }
        }

        for (record, resolution) in records.iter().zip(&resolutions) {
            match resolution {
                Resolution::Unchanged => {
                    debug!(path = ?record.path, "Already in place");
                    self.summary.unchanged += 1;
                    continue;
                }
                Resolution::Renamed { .. } => self.summary.conflicts_renamed += 1,
                Resolution::Overwrite(_) => self.summary.conflicts_overwritten += 1,
                Resolution::Free(_) => {}
            }
            info!(
                source = ?record.path,
                destination = ?resolution.destination(),
                operation = ?self.executor.operation(),
                "Processed file"
            );
            self.summary.processed += 1;
        }
        Ok(())
    }

    /// Transfer one file; `None` when it is already in place
    fn execute(&mut self, record: &FileRecord, resolution: &Resolution) -> Result<Option<u64>> {
        let Some(request) = transfer_request(record, resolution) else {
            return Ok(None);
        };
        self.executor.transfer(&request, self.journal).map(Some)
    }

    /// Take back the completed transfers of a failed group, newest first
    fn revert(&mut self, done: &[(u64, &FileRecord, &Resolution)]) -> Result<()> {
        for &(seq, record, resolution) in done.iter().rev() {
            let Some(request) = transfer_request(record, resolution) else {
                continue;
            };
            if request.overwrite {
                warn!(
                    destination = ?request.destination,
                    "Replaced content cannot be restored; leaving group member in place"
                );
                continue;
            }
            match self.executor.revert(seq, &request, self.journal) {
                Ok(_) => info!(source = ?record.path, "Reverted group member"),
                Err(e @ Error::Journal { .. }) => return Err(e),
                Err(e) => {
                    error!(
                        source = ?record.path,
                        destination = ?request.destination,
                        error = %e,
                        "Failed to revert group member"
                    );
                }
            }
        }
        Ok(())
    }
}

fn transfer_request<'a>(
    record: &'a FileRecord,
    resolution: &'a Resolution,
) -> Option<TransferRequest<'a>> {
    let (destination, candidate, overwrite) = match resolution {
        Resolution::Unchanged => return None,
        Resolution::Free(destination) => (destination.as_path(), None, false),
        Resolution::Renamed {
            candidate,
            destination,
        } => (destination.as_path(), Some(candidate.as_path()), false),
        Resolution::Overwrite(destination) => (destination.as_path(), None, true),
    };
    Some(TransferRequest {
        source: &record.path,
        destination,
        candidate,
        overwrite,
        size: record.size,
        fingerprint: record.fingerprint,
    })
}
