//! Media kind detection
//!
//! The content signature decides first so renamed files are not misfiled;
//! the extension is only consulted when the signature is unknown.

use std::path::Path;
use tracing::debug;

/// Image extensions recognized without a signature
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "webp", "heic", "heif", "avif", "tiff", "tif",
];

/// RAW extensions; nearly all RAW formats sniff as TIFF
const RAW_EXTENSIONS: &[&str] = &[
    "raw", "arw", "cr2", "cr3", "nef", "orf", "rw2", "dng", "raf", "srw", "pef",
];

/// Video extensions recognized without a signature
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "wmv", "flv", "m4v", "3gp"];

/// Media kind, also the file-type folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Raw,
    Gif,
    Video,
    Screenshot,
    /// Not an image or video; left where it is
    Unsupported,
}

impl MediaKind {
    /// Folder name used by the file-type rule
    pub fn folder_name(&self) -> Option<&'static str> {
        match self {
            MediaKind::Photo => Some("Photos"),
            MediaKind::Raw => Some("Raw"),
            MediaKind::Gif => Some("GIFs"),
            MediaKind::Video => Some("Videos"),
            MediaKind::Screenshot => Some("Screenshots"),
            MediaKind::Unsupported => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            MediaKind::Photo | MediaKind::Raw | MediaKind::Gif | MediaKind::Screenshot
        )
    }

    pub fn is_video(&self) -> bool {
        *self == MediaKind::Video
    }

    pub fn is_supported(&self) -> bool {
        *self != MediaKind::Unsupported
    }
}

/// Classify a file by content signature, then extension
pub fn detect_kind(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let kind = match infer::get_from_path(path) {
        Ok(Some(signature)) => from_signature(signature.matcher_type(), signature.mime_type(), &ext),
        Ok(None) => from_extension(&ext),
        Err(e) => {
            debug!(?path, error = %e, "Could not sniff file signature, using extension");
            from_extension(&ext)
        }
    };

    if kind == MediaKind::Photo && is_screenshot_name(path) {
        MediaKind::Screenshot
    } else {
        kind
    }
}

fn from_signature(matcher: infer::MatcherType, mime: &str, ext: &str) -> MediaKind {
    match matcher {
        infer::MatcherType::Image if mime == "image/gif" => MediaKind::Gif,
        infer::MatcherType::Image if RAW_EXTENSIONS.contains(&ext) => MediaKind::Raw,
        infer::MatcherType::Image => MediaKind::Photo,
        infer::MatcherType::Video => MediaKind::Video,
        _ => MediaKind::Unsupported,
    }
}

fn from_extension(ext: &str) -> MediaKind {
    if ext == "gif" {
        MediaKind::Gif
    } else if RAW_EXTENSIONS.contains(&ext) {
        MediaKind::Raw
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        MediaKind::Photo
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        MediaKind::Video
    } else {
        MediaKind::Unsupported
    }
}

fn is_screenshot_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_lowercase().contains("screenshot"))
}
