//! Capture dates from QuickTime / MP4 containers
//!
//! Reads the movie header (`moov/mvhd`) creation time directly from the
//! atom tree. Values are UTC seconds since 1904-01-01; zero means unset.

use crate::error::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// Seconds between 1904-01-01 and 1970-01-01
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Byte range of an atom's payload
#[derive(Debug, Clone, Copy)]
struct Atom {
    body_start: u64,
    end: u64,
}

/// Extract the creation time of a movie, converted to local time
pub fn extract_video_date(path: &Path) -> Result<Option<NaiveDateTime>> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let raw = read_creation_time(&mut reader, len).map_err(|e| Error::VideoMetadata {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    trace!(?path, ?raw, "Read movie header creation time");

    Ok(raw.and_then(mac_seconds_to_local))
}

fn mac_seconds_to_local(seconds: u64) -> Option<NaiveDateTime> {
    if seconds == 0 {
        return None;
    }
    let unix = i64::try_from(seconds).ok()? - MAC_EPOCH_OFFSET;
    DateTime::from_timestamp(unix, 0).map(|utc| utc.with_timezone(&Local).naive_local())
}

fn read_creation_time<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<Option<u64>> {
    let Some(moov) = find_atom(reader, 0, len, b"moov")? else {
        return Ok(None);
    };
    let Some(mvhd) = find_atom(reader, moov.body_start, moov.end, b"mvhd")? else {
        return Ok(None);
    };

    reader.seek(SeekFrom::Start(mvhd.body_start))?;
    let mut version_flags = [0u8; 4];
    reader.read_exact(&mut version_flags)?;

    let created = if version_flags[0] == 1 {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        u64::from_be_bytes(buf)
    } else {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        u64::from(u32::from_be_bytes(buf))
    };
    Ok(Some(created))
}

/// Scan sibling atoms in `[start, end)` for the first one of type `kind`
fn find_atom<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    kind: &[u8; 4],
) -> io::Result<Option<Atom>> {
    let mut pos = start;

    while pos + 8 <= end {
        reader.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;

        let mut header_len = 8u64;
        let size = match u32::from_be_bytes([header[0], header[1], header[2], header[3]]) {
            0 => end - pos,
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                header_len = 16;
                u64::from_be_bytes(large)
            }
            n => u64::from(n),
        };
        if size < header_len {
            // Corrupt atom; nothing past this point can be trusted
            return Ok(None);
        }

        let atom_end = pos.saturating_add(size).min(end);
        if &header[4..8] == kind {
            return Ok(Some(Atom {
                body_start: pos + header_len,
                end: atom_end,
            }));
        }
        pos = atom_end;
    }

    Ok(None)
}
