//! Filesystem mutations: directory creation, moves and copies
//!
//! Every mutation made here is journaled before the call returns.

use crate::config::FileOperation;
use crate::error::{Error, Result};
use crate::hash::{Fingerprint, compute_fingerprint};
use crate::journal::{JournalEntry, JournalWriter};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Buffer size for copies (256KB)
const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// One file transfer to perform
#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    /// Planned path, when the destination is a renamed variant of it
    pub candidate: Option<&'a Path>,
    /// Replace a pre-existing file at `destination`
    pub overwrite: bool,
    pub size: u64,
    pub fingerprint: Option<Fingerprint>,
}

/// Performs transfers in one mode for a whole session
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    operation: FileOperation,
}

impl Executor {
    pub fn new(operation: FileOperation) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> FileOperation {
        self.operation
    }

    /// Create `dir` and any missing parents one level at a time,
    /// journaling each directory actually created
    pub fn prepare_dir(&self, dir: &Path, journal: &mut JournalWriter) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path.as_os_str().is_empty() || fs::symlink_metadata(path).is_ok() {
                break;
            }
            missing.push(path);
            current = path.parent();
        }

        for path in missing.into_iter().rev() {
            match fs::create_dir(path) {
                Ok(()) => {
                    debug!(?path, "Created directory");
                    journal.append(JournalEntry::directory(path))?;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Move or copy one file and journal it; returns the entry's sequence number
    pub fn transfer(&self, request: &TransferRequest<'_>, journal: &mut JournalWriter) -> Result<u64> {
        if let Some(parent) = request.destination.parent() {
            self.prepare_dir(parent, journal)?;
        }

        let replaced = if request.overwrite && request.destination.is_file() {
            Some(compute_fingerprint(request.destination)?)
        } else {
            None
        };

        match self.operation {
            FileOperation::Move => relocate(request.source, request.destination, request.overwrite)?,
            FileOperation::Copy => copy_verified(request.source, request.destination, request.overwrite)?,
        }

        if let Some(replaced) = replaced {
            warn!(
                destination = ?request.destination,
                replaced = %replaced,
                "Replaced existing file"
            );
        }

        let entry = JournalEntry::transfer(
            self.operation,
            request.source,
            request.destination,
            request.candidate,
            request.size,
        )
        .with_fingerprint(request.fingerprint)
        .with_replaced(replaced);
        journal.append(entry)
    }

    /// Take back a transfer journaled as `seq`: a moved file goes back to its
    /// source, a copy is deleted. The reversal is journaled so undo skips
    /// the original entry.
    pub fn revert(
        &self,
        seq: u64,
        request: &TransferRequest<'_>,
        journal: &mut JournalWriter,
    ) -> Result<u64> {
        match self.operation {
            FileOperation::Move => relocate(request.destination, request.source, false)?,
            FileOperation::Copy => fs::remove_file(request.destination)?,
        }
        debug!(seq, destination = ?request.destination, "Reverted transfer");
        journal.append(JournalEntry::reverted(
            seq,
            self.operation,
            request.source,
            request.destination,
        ))
    }
}

/// Move a file, falling back to [`move_by_copy`] when a plain rename is
/// impossible (typically across filesystems)
pub fn relocate(source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && fs::symlink_metadata(destination).is_ok() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("'{}' already exists", destination.display()),
        )));
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(?source, ?destination, error = %e, "Rename failed, copying instead");
            move_by_copy(source, destination, overwrite)
        }
    }
}

/// Copy, verify, then delete the source. The source is only removed once a
/// verified copy exists, and an existing destination is only replaced after
/// that.
pub fn move_by_copy(source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    if !overwrite {
        write_verified(source, destination)?;
        if let Err(e) = fs::remove_file(source) {
            // Leave the source as the only copy rather than duplicating it
            let _ = fs::remove_file(destination);
            return Err(e.into());
        }
        return Ok(());
    }

    let staged = stage_copy(source, destination)?;
    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(&staged);
        return Err(e.into());
    }
    commit(&staged, destination).inspect_err(|e| {
        error!(?staged, ?destination, error = %e, "Moved content left in staging file");
    })
}

/// Copy a file and check the copy has the source's size. The modification
/// time is carried over. With `overwrite`, the copy is staged beside the
/// destination and renamed over it, so a failed copy never touches the
/// existing file.
pub fn copy_verified(source: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    if !overwrite {
        return write_verified(source, destination);
    }

    let staged = stage_copy(source, destination)?;
    commit(&staged, destination).inspect_err(|_| {
        let _ = fs::remove_file(&staged);
    })
}

/// Verified copy into a fresh hidden file next to `destination`
fn stage_copy(source: &Path, destination: &Path) -> Result<PathBuf> {
    let staged = staging_path(destination);
    write_verified(source, &staged)?;
    Ok(staged)
}

fn staging_path(destination: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    destination.with_file_name(format!(".sortwise.{}.{}.tmp", std::process::id(), nanos))
}

/// Rename a staged copy over the destination
fn commit(staged: &Path, destination: &Path) -> Result<()> {
    // Windows rename does not replace an existing file
    #[cfg(windows)]
    if destination.exists() {
        fs::remove_file(destination)?;
    }

    fs::rename(staged, destination)?;
    Ok(())
}

/// Copy into a path that must not exist yet; a failed or short copy is removed
fn write_verified(source: &Path, target: &Path) -> Result<()> {
    let metadata = fs::metadata(source)?;
    let expected = metadata.len();

    if let Err(e) = copy_file(source, target) {
        if e.kind() != io::ErrorKind::AlreadyExists {
            let _ = fs::remove_file(target);
        }
        return Err(e.into());
    }

    let actual = fs::metadata(target)?.len();
    if actual != expected {
        let _ = fs::remove_file(target);
        return Err(Error::IncompleteCopy {
            source_path: source.to_path_buf(),
            dest: target.to_path_buf(),
            expected,
            actual,
        });
    }

    if let Ok(mtime) = metadata.modified()
        && let Err(e) = filetime::set_file_mtime(target, filetime::FileTime::from_system_time(mtime))
    {
        debug!(?target, error = %e, "Could not preserve modification time");
    }

    Ok(())
}

/// Copy file with buffered I/O
fn copy_file(source: &Path, destination: &Path) -> io::Result<()> {
    let src_file = File::open(source)?;
    let dest_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;

    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, src_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}
