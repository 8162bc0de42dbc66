//! Journal replay
//!
//! Walks a session's journal backwards and reverses each entry: moved files
//! go back to where they came from, copies are deleted and directories the
//! session created are removed once empty. Entries that replaced existing
//! content cannot be reversed and are only reported.
//!
//! A failing entry never stops the replay; it is listed in the report.

use crate::config::FileOperation;
use crate::error::Result;
use crate::execute::relocate;
use crate::hash::compute_fingerprint;
use crate::journal::{EntryOp, Journal, JournalEntry};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level, debug, info, span, warn};

/// An entry that could not be reversed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub seq: u64,
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of replaying one journal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub restored: usize,
    pub removed_copies: usize,
    pub removed_directories: usize,
    pub skipped_overwrites: usize,
    pub failed: Vec<FailedEntry>,
}

impl UndoReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut message = format!(
            "Restored {} files, removed {} copies and {} directories",
            self.restored, self.removed_copies, self.removed_directories
        );
        if self.skipped_overwrites > 0 {
            message.push_str(&format!(
                ", {} overwritten files cannot be recovered",
                self.skipped_overwrites
            ));
        }
        if !self.failed.is_empty() {
            message.push_str(&format!("; {} entries could not be undone", self.failed.len()));
        }
        message
    }
}

/// Replay the journal at `path` in reverse
pub fn undo_session(path: &Path) -> Result<UndoReport> {
    let _span = span!(Level::INFO, "undo", journal = ?path).entered();

    let journal = Journal::load(path)?;
    info!(
        session = %journal.header.id,
        entries = journal.entries.len(),
        "Replaying journal"
    );
    if journal.truncated {
        warn!("Journal ends with an incomplete line; the last mutation may not be undone");
    }

    // Transfers the session already took back itself
    let reverted: HashSet<u64> = journal.entries.iter().filter_map(|e| e.reverts).collect();

    let mut report = UndoReport::default();
    for entry in journal.entries.iter().rev() {
        if reverted.contains(&entry.seq) {
            debug!(seq = entry.seq, "Transfer was reverted during the session");
            continue;
        }
        if let Err(reason) = undo_entry(entry, &mut report) {
            warn!(seq = entry.seq, path = ?entry.destination, %reason, "Could not undo entry");
            report.failed.push(FailedEntry {
                seq: entry.seq,
                path: entry.destination.clone(),
                reason,
            });
        }
    }

    info!(
        restored = report.restored,
        removed_copies = report.removed_copies,
        removed_directories = report.removed_directories,
        skipped = report.skipped_overwrites,
        failed = report.failed.len(),
        "Undo finished"
    );
    Ok(report)
}

fn undo_entry(entry: &JournalEntry, report: &mut UndoReport) -> std::result::Result<(), String> {
    if let Some(replaced) = entry.replaced_fingerprint {
        warn!(
            seq = entry.seq,
            destination = ?entry.destination,
            %replaced,
            "Entry overwrote existing content; leaving it in place"
        );
        report.skipped_overwrites += 1;
        return Ok(());
    }

    match (entry.op, entry.transfer) {
        (EntryOp::Reverted, _) => {}
        (EntryOp::CreatedDirectory, _) => {
            remove_created_dir(&entry.destination)?;
            report.removed_directories += 1;
        }
        (_, Some(FileOperation::Move)) => {
            let source = entry
                .source
                .as_deref()
                .ok_or_else(|| "entry has no source path".to_string())?;
            verify_destination(entry)?;
            if fs::symlink_metadata(source).is_ok() {
                return Err(format!("'{}' is occupied", source.display()));
            }
            if let Some(parent) = source.parent() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            relocate(&entry.destination, source, false).map_err(|e| e.to_string())?;
            debug!(from = ?entry.destination, to = ?source, "Restored file");
            report.restored += 1;
        }
        (_, Some(FileOperation::Copy)) => {
            verify_destination(entry)?;
            fs::remove_file(&entry.destination).map_err(|e| e.to_string())?;
            debug!(path = ?entry.destination, "Removed copy");
            report.removed_copies += 1;
        }
        (op, None) => return Err(format!("{:?} entry has no transfer mode", op)),
    }
    Ok(())
}

/// The file at the destination must still be the one the session wrote
fn verify_destination(entry: &JournalEntry) -> std::result::Result<(), String> {
    let metadata = fs::symlink_metadata(&entry.destination)
        .map_err(|e| format!("'{}' is missing: {}", entry.destination.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("'{}' is not a file", entry.destination.display()));
    }
    if let Some(size) = entry.size
        && metadata.len() != size
    {
        return Err(format!(
            "'{}' changed size ({} bytes, expected {})",
            entry.destination.display(),
            metadata.len(),
            size
        ));
    }
    if let Some(expected) = entry.fingerprint {
        let actual = compute_fingerprint(&entry.destination).map_err(|e| e.to_string())?;
        if actual != expected {
            return Err(format!("'{}' content changed", entry.destination.display()));
        }
    }
    Ok(())
}

fn remove_created_dir(path: &Path) -> std::result::Result<(), String> {
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!(?path, "Removed directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "Directory already gone");
            Ok(())
        }
        Err(e) => Err(format!("cannot remove '{}': {}", path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::{Executor, TransferRequest};
    use crate::hash::Fingerprint;
    use crate::journal::{JournalWriter, SessionHeader};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        journal: JournalWriter,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("photos");
        fs::create_dir(&root).unwrap();
        let journal =
            JournalWriter::create(&dir.path().join("journals"), SessionHeader::new(serde_json::Value::Null))
                .unwrap();
        Fixture {
            root,
            journal,
            _dir: dir,
        }
    }

    fn transfer(
        fixture: &mut Fixture,
        operation: FileOperation,
        name: &str,
        destination: &str,
        content: &[u8],
    ) {
        let source = fixture.root.join(name);
        fs::write(&source, content).unwrap();
        let destination = fixture.root.join(destination);
        Executor::new(operation)
            .transfer(
                &TransferRequest {
                    source: &source,
                    destination: &destination,
                    candidate: None,
                    overwrite: false,
                    size: content.len() as u64,
                    fingerprint: Some(Fingerprint::from_bytes(content)),
                },
                &mut fixture.journal,
            )
            .unwrap();
    }

    #[test]
    fn test_undo_restores_moves_and_removes_directories() {
        let mut fx = fixture();
        transfer(&mut fx, FileOperation::Move, "a.jpg", "2023/05/a.jpg", b"a");
        transfer(&mut fx, FileOperation::Move, "b.jpg", "2023/06/b.jpg", b"b");

        let report = undo_session(fx.journal.path()).unwrap();
        assert!(report.is_complete(), "{:?}", report.failed);
        assert_eq!(report.restored, 2);
        assert_eq!(report.removed_directories, 3);

        assert_eq!(fs::read(fx.root.join("a.jpg")).unwrap(), b"a");
        assert_eq!(fs::read(fx.root.join("b.jpg")).unwrap(), b"b");
        assert!(!fx.root.join("2023").exists());
    }

    #[test]
    fn test_undo_removes_copies() {
        let mut fx = fixture();
        transfer(&mut fx, FileOperation::Copy, "a.jpg", "Photos/a.jpg", b"a");

        let report = undo_session(fx.journal.path()).unwrap();
        assert_eq!(report.removed_copies, 1);
        assert_eq!(report.removed_directories, 1);
        assert!(fx.root.join("a.jpg").exists());
        assert!(!fx.root.join("Photos").exists());
    }

    #[test]
    fn test_modified_destination_fails_but_replay_continues() {
        let mut fx = fixture();
        transfer(&mut fx, FileOperation::Move, "a.jpg", "2023/a.jpg", b"a");
        transfer(&mut fx, FileOperation::Move, "b.jpg", "2023/b.jpg", b"b");
        fs::write(fx.root.join("2023/a.jpg"), b"edited").unwrap();

        let report = undo_session(fx.journal.path()).unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.restored, 1);
        // a.jpg could not be restored and 2023/ is not empty
        assert_eq!(report.failed.len(), 2);
        assert!(fx.root.join("b.jpg").exists());
        assert!(fx.root.join("2023/a.jpg").exists());
    }

    #[test]
    fn test_occupied_source_is_not_clobbered() {
        let mut fx = fixture();
        transfer(&mut fx, FileOperation::Move, "a.jpg", "2023/a.jpg", b"a");
        fs::write(fx.root.join("a.jpg"), b"newcomer").unwrap();

        let report = undo_session(fx.journal.path()).unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(fs::read(fx.root.join("a.jpg")).unwrap(), b"newcomer");
        assert!(fx.root.join("2023/a.jpg").exists());
    }

    #[test]
    fn test_overwrite_entries_are_skipped() {
        let mut fx = fixture();
        let source = fx.root.join("new.jpg");
        let destination = fx.root.join("old.jpg");
        fs::write(&source, b"new").unwrap();
        fs::write(&destination, b"old").unwrap();
        Executor::new(FileOperation::Move)
            .transfer(
                &TransferRequest {
                    source: &source,
                    destination: &destination,
                    candidate: None,
                    overwrite: true,
                    size: 3,
                    fingerprint: None,
                },
                &mut fx.journal,
            )
            .unwrap();

        let report = undo_session(fx.journal.path()).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.skipped_overwrites, 1);
        assert_eq!(fs::read(&destination).unwrap(), b"new");
        assert!(report.summary().contains("cannot be recovered"));
    }

    #[test]
    fn test_missing_journal_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(undo_session(&dir.path().join("nope.ndjson")).is_err());
    }

    #[test]
    fn test_reverted_transfers_are_not_undone_twice() {
        let mut fx = fixture();
        let source = fx.root.join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let destination = fx.root.join("Photos/a.jpg");
        let request = TransferRequest {
            source: &source,
            destination: &destination,
            candidate: None,
            overwrite: false,
            size: 1,
            fingerprint: None,
        };
        let executor = Executor::new(FileOperation::Move);
        let seq = executor.transfer(&request, &mut fx.journal).unwrap();
        executor.revert(seq, &request, &mut fx.journal).unwrap();

        let report = undo_session(fx.journal.path()).unwrap();
        assert!(report.is_complete(), "{:?}", report.failed);
        assert_eq!(report.restored, 0);
        assert_eq!(report.removed_directories, 1);
        assert_eq!(fs::read(&source).unwrap(), b"a");
    }
}
