//! Destination conflict resolution
//!
//! Policy:
//! - A free candidate is used as is.
//! - Rename: append " (n)" before the extension until the name is free on
//!   disk and not already handed out this session.
//! - Overwrite: reuse the candidate when it holds a file that predates the
//!   session. Paths handed out this session, paths of files being sorted and
//!   directories are never overwritten; they fall back to renaming.
//!
//! Numbers for one base candidate only ever go up within a session.

use crate::config::ConflictResolution;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Highest disambiguator tried before giving up on a name
const MAX_DISAMBIGUATOR: u32 = 100_000;

/// Final decision for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The file already sits at its planned path
    Unchanged,
    /// Planned path was free
    Free(PathBuf),
    /// Planned path was taken; the file gets a numbered name instead
    Renamed {
        candidate: PathBuf,
        destination: PathBuf,
    },
    /// Planned path holds pre-existing content that will be replaced
    Overwrite(PathBuf),
}

impl Resolution {
    /// Where the file ends up, if it moves at all
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Resolution::Unchanged => None,
            Resolution::Free(path) | Resolution::Overwrite(path) => Some(path),
            Resolution::Renamed { destination, .. } => Some(destination),
        }
    }
}

/// Session-scoped resolver; owns the reservation set
#[derive(Debug)]
pub struct ConflictResolver {
    policy: ConflictResolution,
    /// Every destination handed out so far
    reserved: HashSet<PathBuf>,
    /// Source paths of the files in this session
    session_sources: HashSet<PathBuf>,
    /// Last disambiguator used per base candidate
    last_number: HashMap<PathBuf, u32>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictResolution) -> Self {
        Self {
            policy,
            reserved: HashSet::new(),
            session_sources: HashSet::new(),
            last_number: HashMap::new(),
        }
    }

    /// Register the files of this session so they are never overwritten
    pub fn protect_sources<I, P>(&mut self, sources: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.session_sources
            .extend(sources.into_iter().map(Into::into));
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.contains(path)
    }

    /// Resolve a single file's candidate
    pub fn resolve(&mut self, source: &Path, candidate: PathBuf) -> Result<Resolution> {
        let fallback = candidate.clone();
        self.resolve_group(&[(source, candidate)])?
            .pop()
            .ok_or(Error::NoFreeName { path: fallback })
    }

    /// Resolve candidates that must share one disambiguator, such as the
    /// still and motion halves of a live photo. Results follow `members`.
    pub fn resolve_group(&mut self, members: &[(&Path, PathBuf)]) -> Result<Vec<Resolution>> {
        let Some((_, first)) = members.first() else {
            return Ok(Vec::new());
        };

        if members.iter().all(|(source, candidate)| *source == candidate.as_path()) {
            trace!(?first, "Already at planned location");
            for (source, _) in members {
                self.reserved.insert(source.to_path_buf());
            }
            return Ok(vec![Resolution::Unchanged; members.len()]);
        }

        if members
            .iter()
            .all(|(source, candidate)| self.accepts_as_is(source, candidate))
        {
            let resolutions: Vec<Resolution> = members
                .iter()
                .map(|(source, candidate)| {
                    if *source == candidate.as_path() {
                        Resolution::Unchanged
                    } else if self.is_free(candidate) {
                        Resolution::Free(candidate.clone())
                    } else {
                        debug!(?candidate, "Overwriting existing file");
                        Resolution::Overwrite(candidate.clone())
                    }
                })
                .collect();
            self.reserve(members, &resolutions);
            return Ok(resolutions);
        }

        let start = members
            .iter()
            .map(|(_, candidate)| self.last_number.get(candidate).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
            + 1;

        for n in start..=MAX_DISAMBIGUATOR {
            let names: Vec<PathBuf> = members
                .iter()
                .map(|(_, candidate)| numbered(candidate, n))
                .collect();
            let all_free = names
                .iter()
                .zip(members)
                .all(|(name, (source, _))| name.as_path() == *source || self.is_free(name));
            if !all_free {
                continue;
            }

            let resolutions: Vec<Resolution> = names
                .into_iter()
                .zip(members)
                .map(|(name, (source, candidate))| {
                    self.last_number.insert(candidate.clone(), n);
                    if name.as_path() == *source {
                        Resolution::Unchanged
                    } else {
                        Resolution::Renamed {
                            candidate: candidate.clone(),
                            destination: name,
                        }
                    }
                })
                .collect();
            debug!(?first, disambiguator = n, "Resolved name conflict");
            self.reserve(members, &resolutions);
            return Ok(resolutions);
        }

        Err(Error::NoFreeName {
            path: first.clone(),
        })
    }

    fn reserve(&mut self, members: &[(&Path, PathBuf)], resolutions: &[Resolution]) {
        for ((source, _), resolution) in members.iter().zip(resolutions) {
            let path = resolution
                .destination()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source.to_path_buf());
            self.reserved.insert(path);
        }
    }

    /// Whether the unsuffixed candidate can be used for `source`
    fn accepts_as_is(&self, source: &Path, candidate: &Path) -> bool {
        source == candidate || self.is_free(candidate) || self.can_overwrite(candidate)
    }

    /// Nothing on disk and not handed out this session
    fn is_free(&self, path: &Path) -> bool {
        !self.reserved.contains(path) && fs::symlink_metadata(path).is_err()
    }

    fn can_overwrite(&self, path: &Path) -> bool {
        self.policy == ConflictResolution::Overwrite
            && !self.reserved.contains(path)
            && !self.session_sources.contains(path)
            && fs::symlink_metadata(path).is_ok_and(|m| m.is_file())
    }
}

/// `dir/name (n).ext`
fn numbered(candidate: &Path, n: u32) -> PathBuf {
    let mut name: OsString = candidate
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    name.push(format!(" ({})", n));
    if let Some(ext) = candidate.extension() {
        name.push(".");
        name.push(ext);
    }
    candidate.with_file_name(name)
}
