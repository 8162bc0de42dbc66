//! Metadata extraction module
//!
//! Builds the attribute set the planner organizes by:
//! - Media kind from content signature or extension
//! - Capture date from EXIF, movie headers or the file name
//! - Camera model, GPS position and orientation from EXIF
//! - Live-photo group key from the file's directory and stem
//!
//! Missing tags are soft gaps: the field stays empty and the planner files
//! the media under an "Unknown ..." folder.

pub mod exif;
pub mod filename;
pub mod kind;
pub mod video;

use crate::config::SortOptions;
use crate::error::Result;
use crate::hash::Fingerprint;
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub use kind::MediaKind;

/// Where a capture date came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// EXIF DateTimeOriginal and friends
    Exif,
    /// QuickTime / MP4 movie header
    MovieHeader,
    /// Parsed from the file name
    Filename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureDate {
    pub timestamp: NaiveDateTime,
    pub source: DateSource,
}

/// Position in signed decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Displayed orientation of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    /// Orientation of `width x height` pixels stored with EXIF orientation `tag`.
    /// Tags 5-8 rotate by 90 degrees, swapping the axes.
    pub fn from_dimensions(width: u32, height: u32, tag: Option<u32>) -> Self {
        let (width, height) = match tag {
            Some(5..=8) => (height, width),
            _ => (width, height),
        };
        match width.cmp(&height) {
            std::cmp::Ordering::Greater => Orientation::Landscape,
            std::cmp::Ordering::Less => Orientation::Portrait,
            std::cmp::Ordering::Equal => Orientation::Square,
        }
    }

    pub fn folder_name(&self) -> &'static str {
        match self {
            Orientation::Landscape => "Landscape",
            Orientation::Portrait => "Portrait",
            Orientation::Square => "Square",
        }
    }
}

/// Attributes extracted from one file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttributes {
    pub kind: MediaKind,
    pub capture_date: Option<CaptureDate>,
    pub camera_model: Option<String>,
    pub location: Option<GeoPoint>,
    pub orientation: Option<Orientation>,
    /// Shared by a still image and its motion clip
    pub live_photo_key: Option<String>,
}

impl MediaAttributes {
    /// Attributes of a file with nothing known but its kind
    pub fn bare(kind: MediaKind) -> Self {
        Self {
            kind,
            capture_date: None,
            camera_model: None,
            location: None,
            orientation: None,
            live_photo_key: None,
        }
    }
}

/// A discovered file and what we know about it
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute source path
    pub path: PathBuf,
    /// Input folder the file was found under
    pub root: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Set lazily, only when deduplication is enabled
    pub fingerprint: Option<Fingerprint>,
    pub attributes: MediaAttributes,
}

impl FileRecord {
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}

/// Read a file's attributes; only the dimensions enabled in `options` are looked up
pub fn extract(path: &Path, root: &Path, options: &SortOptions) -> Result<FileRecord> {
    let metadata = fs::metadata(path)?;
    let kind = kind::detect_kind(path);
    let mut attributes = MediaAttributes::bare(kind);

    if kind.is_supported() {
        fill_attributes(path, options, &mut attributes);
    } else {
        debug!(?path, "Not a media file");
    }

    Ok(FileRecord {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
        size: metadata.len(),
        modified: metadata.modified().ok(),
        fingerprint: None,
        attributes,
    })
}

fn fill_attributes(path: &Path, options: &SortOptions, attributes: &mut MediaAttributes) {
    let kind = attributes.kind;
    let wants_exif =
        options.exif_date || options.camera_model || options.location || options.orientation;

    let exif = if kind.is_image() && wants_exif {
        match exif::read_exif(path) {
            Ok(exif) => Some(exif),
            Err(e) => {
                debug!(?path, error = %e, "No EXIF data");
                None
            }
        }
    } else {
        None
    };

    if options.exif_date {
        attributes.capture_date = capture_date(path, kind, exif.as_ref());
        if attributes.capture_date.is_none() {
            debug!(?path, "No capture date found");
        }
    }

    if let Some(ref exif) = exif {
        attributes.camera_model = exif.camera_model.clone();
        attributes.location = exif.gps;
    }

    if options.orientation && kind.is_image() {
        attributes.orientation = image_orientation(path, kind, exif.as_ref());
    }

    if options.live_photos && (kind.is_image() || kind.is_video()) {
        attributes.live_photo_key = live_photo_key(path);
    }
}

/// Capture date by priority: EXIF, movie header, file name
fn capture_date(
    path: &Path,
    kind: MediaKind,
    exif: Option<&exif::ExifAttributes>,
) -> Option<CaptureDate> {
    if let Some(timestamp) = exif.and_then(|e| e.capture_date) {
        return Some(CaptureDate {
            timestamp,
            source: DateSource::Exif,
        });
    }

    if kind.is_video() {
        match video::extract_video_date(path) {
            Ok(Some(timestamp)) => {
                return Some(CaptureDate {
                    timestamp,
                    source: DateSource::MovieHeader,
                });
            }
            Ok(None) => {}
            Err(e) => debug!(?path, error = %e, "Could not read movie header"),
        }
    }

    let filename = path.file_name().and_then(|f| f.to_str())?;
    filename::parse_filename_date(filename).map(|timestamp| CaptureDate {
        timestamp,
        source: DateSource::Filename,
    })
}

fn image_orientation(
    path: &Path,
    kind: MediaKind,
    exif: Option<&exif::ExifAttributes>,
) -> Option<Orientation> {
    let tag = exif.and_then(|e| e.orientation_tag);

    if let Some((width, height)) = exif.and_then(|e| e.dimensions) {
        return Some(Orientation::from_dimensions(width, height, tag));
    }

    // RAW decoders are out of reach; their EXIF block is the only source
    if kind == MediaKind::Raw {
        return None;
    }

    let dimensions = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::from)
        .and_then(|reader| reader.into_dimensions());
    match dimensions {
        Ok((width, height)) if width > 0 && height > 0 => {
            Some(Orientation::from_dimensions(width, height, tag))
        }
        Ok(_) => None,
        Err(e) => {
            debug!(?path, error = %e, "Could not read image dimensions");
            None
        }
    }
}

/// `<parent>/<lowercased stem>`: a still and its clip share it
fn live_photo_key(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let parent = path.parent()?;
    Some(format!("{}/{}", parent.display(), stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    /// Uncompressed 24-bit BMP of the given size, all black
    fn bmp_with_size(width: u32, height: u32) -> Vec<u8> {
        let row = (width * 3).div_ceil(4) * 4;
        let pixels = row * height;
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&(54 + pixels).to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&54u32.to_le_bytes());
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&(width as i32).to_le_bytes());
        data.extend_from_slice(&(height as i32).to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&[0; 24]);
        data.extend(std::iter::repeat_n(0u8, pixels as usize));
        data
    }

    #[test]
    fn test_orientation_from_dimensions() {
        assert_eq!(Orientation::from_dimensions(4000, 3000, None), Orientation::Landscape);
        assert_eq!(Orientation::from_dimensions(3000, 4000, Some(1)), Orientation::Portrait);
        // Rotated 90 degrees
        assert_eq!(Orientation::from_dimensions(4000, 3000, Some(6)), Orientation::Portrait);
        assert_eq!(Orientation::from_dimensions(100, 100, Some(8)), Orientation::Square);
    }

    #[test]
    fn test_extract_respects_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("IMG_20230514_101500.jpg");
        fs::File::create(&path).unwrap().write_all(b"jpeg-ish").unwrap();

        let none = SortOptions::default();
        let record = extract(&path, dir.path(), &none).unwrap();
        assert_eq!(record.attributes.kind, MediaKind::Photo);
        assert!(record.attributes.capture_date.is_none());
        assert!(record.attributes.live_photo_key.is_none());
        assert_eq!(record.size, 8);
        assert_eq!(record.root, dir.path());

        let options = SortOptions {
            exif_date: true,
            live_photos: true,
            ..SortOptions::default()
        };
        let record = extract(&path, dir.path(), &options).unwrap();
        let date = record.attributes.capture_date.unwrap();
        assert_eq!(date.source, DateSource::Filename);
        assert_eq!(date.timestamp.to_string(), "2023-05-14 10:15:00");
        assert!(record.attributes.live_photo_key.unwrap().ends_with("/img_20230514_101500"));
    }

    #[test]
    fn test_orientation_from_image_header() {
        let dir = tempdir().unwrap();
        let wide = dir.path().join("wide.bmp");
        fs::write(&wide, bmp_with_size(8, 4)).unwrap();
        let tall = dir.path().join("tall.bmp");
        fs::write(&tall, bmp_with_size(4, 8)).unwrap();

        let options = SortOptions {
            orientation: true,
            ..SortOptions::default()
        };
        let record = extract(&wide, dir.path(), &options).unwrap();
        assert_eq!(record.attributes.orientation, Some(Orientation::Landscape));
        let record = extract(&tall, dir.path(), &options).unwrap();
        assert_eq!(record.attributes.orientation, Some(Orientation::Portrait));
    }

    #[test]
    fn test_live_photo_keys_match_across_extensions() {
        let still = live_photo_key(Path::new("/photos/IMG_0001.HEIC")).unwrap();
        let clip = live_photo_key(Path::new("/photos/IMG_0001.mov")).unwrap();
        assert_eq!(still, clip);
        assert_ne!(still, live_photo_key(Path::new("/other/IMG_0001.mov")).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = extract(&dir.path().join("gone.jpg"), dir.path(), &SortOptions::default());
        assert!(result.is_err());
    }
}
