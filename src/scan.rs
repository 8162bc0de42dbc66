//! Input folder enumeration
//!
//! Walks every selected folder, skips excluded directories and returns the
//! regular files found, each paired with the folder it was found under.
//! The result is sorted by path so repeated runs see the same order.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A regular file discovered under one of the input folders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub root: PathBuf,
}

/// Check the selected folders and canonicalize them.
///
/// Any missing, unreadable or non-directory folder fails the whole session
/// before a single file is touched.
pub fn validate_folders(folders: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if folders.is_empty() {
        return Err(Error::Setup("no folders selected".into()));
    }

    folders
        .iter()
        .map(|folder| {
            let canonical = fs::canonicalize(folder).map_err(|e| {
                Error::Setup(format!("folder '{}' is not accessible: {}", folder.display(), e))
            })?;
            if !canonical.is_dir() {
                return Err(Error::Setup(format!(
                    "'{}' is not a directory",
                    folder.display()
                )));
            }
            fs::read_dir(&canonical).map_err(|e| {
                Error::Setup(format!("folder '{}' is not readable: {}", folder.display(), e))
            })?;
            Ok(canonical)
        })
        .collect()
}

/// Enumerate regular files under `roots` in lexicographic path order.
///
/// Files reachable from several (overlapping) roots are reported once, under
/// the first root listed.
pub fn scan_folders(roots: &[PathBuf], exclude: &[PathBuf]) -> Vec<ScannedFile> {
    let mut found: HashMap<PathBuf, PathBuf> = HashMap::new();

    for root in roots {
        let before = found.len();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !(e.file_type().is_dir() && is_excluded(e.path(), exclude))
            })
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() {
                found
                    .entry(entry.into_path())
                    .or_insert_with(|| root.clone());
            }
        }
        debug!(?root, files = found.len() - before, "Scanned folder");
    }

    let mut files: Vec<ScannedFile> = found
        .into_iter()
        .map(|(path, root)| ScannedFile { path, root })
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    info!(count = files.len(), "Found files");
    files
}

/// Check if a path is excluded, by absolute prefix or by folder name
fn is_excluded(path: &Path, exclude: &[PathBuf]) -> bool {
    for pattern in exclude {
        if pattern.is_absolute() {
            if path.starts_with(pattern) {
                debug!(?path, ?pattern, "Excluding directory (absolute path match)");
                return true;
            }
        } else if pattern.file_name().is_some() && path.file_name() == pattern.file_name() {
            debug!(?path, ?pattern, "Excluding directory (folder name match)");
            return true;
        }
    }

    false
}
