//! Append-only undo journal
//!
//! One JSON object per line. The first line is the session header, every
//! following line records one completed filesystem mutation. Each append is
//! flushed and synced before the next unit starts, so a crash loses at most
//! the line being written.

use crate::config::FileOperation;
use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Current journal format version
pub const JOURNAL_VERSION: u32 = 1;

/// Disambiguates sessions started within the same second by one process
static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// What a journal entry did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryOp {
    Moved,
    Copied,
    RenamedOnConflict,
    CreatedDirectory,
    /// A transfer taken back during the session
    Reverted,
}

/// First line of every journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    pub version: u32,
    pub id: String,
    pub started: DateTime<Local>,
    pub engine_version: String,
    /// The payload the session ran with
    pub options: serde_json::Value,
}

impl SessionHeader {
    pub fn new(options: serde_json::Value) -> Self {
        let started = Local::now();
        let id = format!(
            "{}-{}-{}",
            started.format("%Y%m%dT%H%M%S"),
            std::process::id(),
            SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            version: JOURNAL_VERSION,
            id,
            started,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            options,
        }
    }
}

/// One executed mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub seq: u64,
    pub op: EntryOp,
    /// How the file was transferred; absent for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<FileOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "stored_path::option")]
    pub source: Option<PathBuf>,
    #[serde(with = "stored_path")]
    pub destination: PathBuf,
    /// Planned path before renaming
    #[serde(default, skip_serializing_if = "Option::is_none", with = "stored_path::option")]
    pub candidate: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub timestamp: DateTime<Local>,
    /// Fingerprint of destination content this entry replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_fingerprint: Option<Fingerprint>,
    /// Sequence number of the entry a `reverted` entry cancels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<u64>,
}

impl JournalEntry {
    /// Entry for a file transfer; `seq` is assigned on append
    pub fn transfer(
        transfer: FileOperation,
        source: &Path,
        destination: &Path,
        candidate: Option<&Path>,
        size: u64,
    ) -> Self {
        let op = match (candidate, transfer) {
            (Some(_), _) => EntryOp::RenamedOnConflict,
            (None, FileOperation::Move) => EntryOp::Moved,
            (None, FileOperation::Copy) => EntryOp::Copied,
        };
        Self {
            seq: 0,
            op,
            transfer: Some(transfer),
            source: Some(source.to_path_buf()),
            destination: destination.to_path_buf(),
            candidate: candidate.map(Path::to_path_buf),
            size: Some(size),
            fingerprint: None,
            timestamp: Local::now(),
            replaced_fingerprint: None,
            reverts: None,
        }
    }

    /// Entry for a directory the session created
    pub fn directory(path: &Path) -> Self {
        Self {
            seq: 0,
            op: EntryOp::CreatedDirectory,
            transfer: None,
            source: None,
            destination: path.to_path_buf(),
            candidate: None,
            size: None,
            fingerprint: None,
            timestamp: Local::now(),
            replaced_fingerprint: None,
            reverts: None,
        }
    }

    /// Entry cancelling the transfer journaled as `seq`
    pub fn reverted(
        seq: u64,
        transfer: FileOperation,
        source: &Path,
        destination: &Path,
    ) -> Self {
        Self {
            op: EntryOp::Reverted,
            size: None,
            reverts: Some(seq),
            ..Self::transfer(transfer, source, destination, None, 0)
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_replaced(mut self, replaced: Option<Fingerprint>) -> Self {
        self.replaced_fingerprint = replaced;
        self
    }
}

/// A journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JournalRecord {
    Session(SessionHeader),
    Entry(JournalEntry),
}

/// Writer for one session's journal
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    file: File,
    next_seq: u64,
}

impl JournalWriter {
    /// Create a new journal in `dir`. Never reuses an existing file.
    pub fn create(dir: &Path, header: SessionHeader) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            Error::Setup(format!(
                "cannot create journal directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(format!("sortwise-{}.ndjson", header.id));
        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                Error::Setup(format!("cannot create journal '{}': {}", path.display(), e))
            })?;

        let mut writer = Self {
            path,
            file,
            next_seq: 1,
        };
        writer.write_line(&JournalRecord::Session(header))?;
        info!(journal = ?writer.path, "Journal created");
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry and sync it to disk; returns its sequence number
    pub fn append(&mut self, mut entry: JournalEntry) -> Result<u64> {
        entry.seq = self.next_seq;
        let seq = entry.seq;
        debug!(seq, op = ?entry.op, destination = ?entry.destination, "Journal entry");
        self.write_line(&JournalRecord::Entry(entry))?;
        self.next_seq += 1;
        Ok(seq)
    }

    fn write_line(&mut self, record: &JournalRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| Error::Journal {
            path: self.path.clone(),
            message: format!("cannot encode record: {}", e),
        })?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| Error::Journal {
                path: self.path.clone(),
                message: format!("write failed: {}", e),
            })
    }
}

/// Journal paths: a JSON string when the path is valid UTF-8, otherwise
/// `{"raw": [...]}` with the platform's native units (bytes on Unix, UTF-16
/// units on Windows). Every path the filesystem returns can be recorded.
mod stored_path {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    #[cfg(unix)]
    type Unit = u8;
    #[cfg(windows)]
    type Unit = u16;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Text(String),
        Raw { raw: Vec<Unit> },
    }

    impl Stored {
        fn from_path(path: &Path) -> Self {
            match path.to_str() {
                Some(text) => Stored::Text(text.to_owned()),
                None => Stored::Raw {
                    raw: native_units(path),
                },
            }
        }

        fn into_path(self) -> PathBuf {
            match self {
                Stored::Text(text) => PathBuf::from(text),
                Stored::Raw { raw } => PathBuf::from(from_native_units(raw)),
            }
        }
    }

    #[cfg(unix)]
    fn native_units(path: &Path) -> Vec<Unit> {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    }

    #[cfg(unix)]
    fn from_native_units(raw: Vec<Unit>) -> OsString {
        use std::os::unix::ffi::OsStringExt;
        OsString::from_vec(raw)
    }

    #[cfg(windows)]
    fn native_units(path: &Path) -> Vec<Unit> {
        use std::os::windows::ffi::OsStrExt;
        path.as_os_str().encode_wide().collect()
    }

    #[cfg(windows)]
    fn from_native_units(raw: Vec<Unit>) -> OsString {
        use std::os::windows::ffi::OsStringExt;
        OsString::from_wide(&raw)
    }

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        Stored::from_path(path).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        Stored::deserialize(deserializer).map(Stored::into_path)
    }

    pub mod option {
        use super::Stored;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::path::PathBuf;

        pub fn serialize<S: Serializer>(
            path: &Option<PathBuf>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            path.as_deref().map(Stored::from_path).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<PathBuf>, D::Error> {
            Option::<Stored>::deserialize(deserializer).map(|stored| stored.map(Stored::into_path))
        }
    }
}

/// A journal read back for replay
#[derive(Debug, Clone)]
pub struct Journal {
    pub header: SessionHeader,
    pub entries: Vec<JournalEntry>,
    /// An incomplete final line was dropped
    pub truncated: bool,
}

impl Journal {
    /// Read and validate a journal file
    pub fn load(path: &Path) -> Result<Self> {
        let journal_error = |message: String| Error::Journal {
            path: path.to_path_buf(),
            message,
        };

        let content = fs::read_to_string(path)
            .map_err(|e| journal_error(format!("cannot read journal: {}", e)))?;
        let complete = content.ends_with('\n');
        let lines: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let mut header = None;
        let mut entries = Vec::new();
        let mut truncated = false;

        for (index, (number, line)) in lines.iter().enumerate() {
            let record = match serde_json::from_str::<JournalRecord>(line) {
                Ok(record) => record,
                Err(e) if !complete && index + 1 == lines.len() => {
                    warn!(line = number + 1, error = %e, "Ignoring truncated final journal line");
                    truncated = true;
                    break;
                }
                Err(e) => {
                    return Err(journal_error(format!(
                        "malformed line {}: {}",
                        number + 1,
                        e
                    )));
                }
            };

            match (record, header.is_some()) {
                (JournalRecord::Session(h), false) => {
                    if h.version != JOURNAL_VERSION {
                        return Err(journal_error(format!(
                            "unsupported journal version {}",
                            h.version
                        )));
                    }
                    header = Some(h);
                }
                (JournalRecord::Entry(entry), true) => entries.push(entry),
                (JournalRecord::Session(_), true) => {
                    return Err(journal_error(format!(
                        "unexpected session header on line {}",
                        number + 1
                    )));
                }
                (JournalRecord::Entry(_), false) => {
                    return Err(journal_error("missing session header".into()));
                }
            }
        }

        let header = header.ok_or_else(|| journal_error("missing session header".into()))?;
        Ok(Self {
            header,
            entries,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header() -> SessionHeader {
        SessionHeader::new(serde_json::json!({"folders": ["/photos"]}))
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(dir.path(), header()).unwrap();

        let seq = writer
            .append(JournalEntry::directory(Path::new("/photos/2023")))
            .unwrap();
        assert_eq!(seq, 1);
        let seq = writer
            .append(
                JournalEntry::transfer(
                    FileOperation::Move,
                    Path::new("/photos/a.jpg"),
                    Path::new("/photos/2023/a (1).jpg"),
                    Some(Path::new("/photos/2023/a.jpg")),
                    42,
                )
                .with_fingerprint(Some(Fingerprint::from_bytes(b"a"))),
            )
            .unwrap();
        assert_eq!(seq, 2);

        let journal = Journal::load(writer.path()).unwrap();
        assert_eq!(journal.header.version, JOURNAL_VERSION);
        assert!(!journal.truncated);
        assert_eq!(journal.entries.len(), 2);
        assert_eq!(journal.entries[0].op, EntryOp::CreatedDirectory);
        assert_eq!(journal.entries[1].op, EntryOp::RenamedOnConflict);
        assert_eq!(journal.entries[1].transfer, Some(FileOperation::Move));
        assert_eq!(journal.entries[1].size, Some(42));
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = JournalEntry::transfer(
            FileOperation::Copy,
            Path::new("/in/a.jpg"),
            Path::new("/out/a.jpg"),
            None,
            7,
        )
        .with_replaced(Some(Fingerprint::from_bytes(b"old")));
        let value = serde_json::to_value(JournalRecord::Entry(entry)).unwrap();

        assert_eq!(value["type"], "entry");
        assert_eq!(value["op"], "copied");
        assert_eq!(value["transfer"], "copy");
        assert!(value.get("candidate").is_none());
        assert!(value["replacedFingerprint"].is_string());
    }

    #[test]
    fn test_journal_files_are_never_reused() {
        let dir = tempdir().unwrap();
        let first = JournalWriter::create(dir.path(), header()).unwrap();
        let second = JournalWriter::create(dir.path(), header()).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_truncated_final_line_is_ignored() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(dir.path(), header()).unwrap();
        writer
            .append(JournalEntry::directory(Path::new("/photos/2023")))
            .unwrap();
        let path = writer.path().to_path_buf();
        drop(writer);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"type":"entry","seq":2,"op":"mov"#).unwrap();

        let journal = Journal::load(&path).unwrap();
        assert!(journal.truncated);
        assert_eq!(journal.entries.len(), 1);
    }

    #[test]
    fn test_malformed_middle_line_is_an_error() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(dir.path(), header()).unwrap();
        let path = writer.path().to_path_buf();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"garbage\n").unwrap();
        writer
            .append(JournalEntry::directory(Path::new("/photos/2023")))
            .unwrap();

        assert!(matches!(Journal::load(&path), Err(Error::Journal { .. })));
    }

    #[test]
    fn test_missing_header_or_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Journal::load(&dir.path().join("missing.ndjson")).is_err());

        let headless = dir.path().join("headless.ndjson");
        let entry = JournalRecord::Entry(JournalEntry::directory(Path::new("/x")));
        fs::write(&headless, format!("{}\n", serde_json::to_string(&entry).unwrap())).unwrap();
        assert!(Journal::load(&headless).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_are_stored_losslessly() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(dir.path(), header()).unwrap();
        let source = Path::new("/photos").join(OsStr::from_bytes(b"caf\xe9.jpg"));
        let destination = Path::new("/photos/Photos").join(OsStr::from_bytes(b"caf\xe9.jpg"));

        writer
            .append(JournalEntry::transfer(
                FileOperation::Move,
                &source,
                &destination,
                Some(Path::new("/photos/Photos/cafe.jpg")),
                3,
            ))
            .unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        assert!(content.contains(r#""candidate":"/photos/Photos/cafe.jpg""#));
        assert!(content.contains(r#""raw":["#));

        let entry = &Journal::load(writer.path()).unwrap().entries[0];
        assert_eq!(entry.source.as_deref(), Some(source.as_path()));
        assert_eq!(entry.destination, destination);
    }

    #[test]
    fn test_reverted_entry_points_at_original() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(dir.path(), header()).unwrap();
        let seq = writer
            .append(JournalEntry::transfer(
                FileOperation::Copy,
                Path::new("/in/a.jpg"),
                Path::new("/out/a.jpg"),
                None,
                1,
            ))
            .unwrap();
        writer
            .append(JournalEntry::reverted(
                seq,
                FileOperation::Copy,
                Path::new("/in/a.jpg"),
                Path::new("/out/a.jpg"),
            ))
            .unwrap();

        let entries = Journal::load(writer.path()).unwrap().entries;
        assert_eq!(entries[1].op, EntryOp::Reverted);
        assert_eq!(entries[1].reverts, Some(seq));
        assert_eq!(entries[1].size, None);
        assert_eq!(entries[0].reverts, None);
    }
}
