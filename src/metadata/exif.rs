//! EXIF attribute extraction for images

use super::GeoPoint;
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use exif::{Exif, Field, In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::trace;

/// EXIF tags to try for date extraction, in priority order
const DATE_TAGS: &[Tag] = &[
    Tag::DateTimeOriginal,    // When the original image was taken
    Tag::DateTimeDigitized,   // When the image was digitized
    Tag::DateTime,            // File modification date/time
];

/// Everything the organizer reads from an EXIF block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifAttributes {
    pub capture_date: Option<NaiveDateTime>,
    pub camera_model: Option<String>,
    pub gps: Option<GeoPoint>,
    /// Raw `Orientation` tag (1-8)
    pub orientation_tag: Option<u32>,
    /// Stored pixel dimensions, before any rotation
    pub dimensions: Option<(u32, u32)>,
}

/// Read the EXIF block of an image container
pub fn read_exif(path: &Path) -> Result<ExifAttributes> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let exif = Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| Error::ExifRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let attributes = ExifAttributes {
        capture_date: capture_date(&exif),
        camera_model: exif
            .get_field(Tag::Model, In::PRIMARY)
            .and_then(ascii_value),
        gps: gps_position(&exif),
        orientation_tag: exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .filter(|v| (1..=8).contains(v)),
        dimensions: pixel_dimensions(&exif),
    };

    trace!(?path, ?attributes, "Read EXIF attributes");
    Ok(attributes)
}

fn capture_date(exif: &Exif) -> Option<NaiveDateTime> {
    DATE_TAGS.iter().find_map(|tag| {
        let field = exif.get_field(*tag, In::PRIMARY)?;
        parse_exif_datetime(&field.display_value().to_string())
    })
}

fn pixel_dimensions(exif: &Exif) -> Option<(u32, u32)> {
    let width = exif
        .get_field(Tag::PixelXDimension, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))?;
    let height = exif
        .get_field(Tag::PixelYDimension, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))?;
    (width > 0 && height > 0).then_some((width, height))
}

fn gps_position(exif: &Exif) -> Option<GeoPoint> {
    let latitude = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S')?;
    let longitude = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W')?;

    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(GeoPoint {
        latitude,
        longitude,
    })
}

/// Degrees/minutes/seconds rationals to signed decimal degrees
fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: char) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(ref parts) = field.value else {
        return None;
    };
    if parts.len() < 3 || parts.iter().take(3).any(|r| r.denom == 0) {
        return None;
    }
    let decimal = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;

    let reference = exif.get_field(ref_tag, In::PRIMARY).and_then(ascii_value)?;
    let negative = reference
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&negative_ref));
    Some(if negative { -decimal } else { decimal })
}

/// First ASCII string of a field, trimmed; `None` when empty
fn ascii_value(field: &Field) -> Option<String> {
    let text = match field.value {
        Value::Ascii(ref values) => values
            .first()
            .map(|v| String::from_utf8_lossy(v).into_owned())?,
        _ => field.display_value().to_string(),
    };
    let text = text.trim_matches(|c: char| c == '"' || c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse EXIF datetime string format: "YYYY:MM:DD HH:MM:SS"
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('"');

    let formats = [
        "%Y:%m:%d %H:%M:%S",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}
