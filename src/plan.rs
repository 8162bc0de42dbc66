//! Destination path planning
//!
//! Pure mapping from extracted attributes to relative folder segments.
//! Segments always appear in the same order (date, camera, type, location,
//! orientation) and a missing attribute yields an "Unknown ..." folder, so
//! the same attributes and options always produce the same path.

use crate::config::{DateGranularity, MonthFormat, SortConfig, SortOptions};
use crate::metadata::{FileRecord, GeoPoint, MediaAttributes};
use chrono::Datelike;
use std::path::{Path, PathBuf};

pub const UNKNOWN_DATE: &str = "Unknown Date";
pub const UNKNOWN_CAMERA: &str = "Unknown Camera";
pub const UNKNOWN_TYPE: &str = "Unknown Type";
pub const UNKNOWN_LOCATION: &str = "Unknown Location";
pub const UNKNOWN_ORIENTATION: &str = "Unknown Orientation";

/// Trailing folder for still/motion pairs
pub const LIVE_PHOTOS_FOLDER: &str = "Live Photos";

/// Characters that cannot appear in a folder name on common filesystems
const PATH_HOSTILE: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Planner for one session's options
#[derive(Debug, Clone)]
pub struct PathPlanner {
    options: SortOptions,
    date_granularity: DateGranularity,
    month_format: MonthFormat,
    location_precision: u8,
    destination: Option<PathBuf>,
}

impl PathPlanner {
    pub fn new(config: &SortConfig) -> Self {
        Self {
            options: config.sort_options,
            date_granularity: config.date_granularity,
            month_format: config.month_format,
            location_precision: config.location_precision,
            destination: config.destination.clone(),
        }
    }

    /// Relative folder segments for a single file
    pub fn segments(&self, attributes: &MediaAttributes) -> Vec<String> {
        let mut segments = Vec::new();

        if self.options.exif_date {
            match attributes.capture_date {
                Some(date) => {
                    let ts = date.timestamp;
                    match (self.date_granularity, self.month_format) {
                        (DateGranularity::Year, _) => segments.push(format!("{}", ts.year())),
                        (DateGranularity::YearMonth, MonthFormat::Nested) => {
                            segments.push(format!("{}", ts.year()));
                            segments.push(format!("{:02}", ts.month()));
                        }
                        (DateGranularity::YearMonth, MonthFormat::Combined) => {
                            segments.push(format!("{}-{:02}", ts.year(), ts.month()));
                        }
                    }
                }
                None => segments.push(UNKNOWN_DATE.to_string()),
            }
        }

        if self.options.camera_model {
            let camera = attributes
                .camera_model
                .as_deref()
                .and_then(sanitize_segment)
                .unwrap_or_else(|| UNKNOWN_CAMERA.to_string());
            segments.push(camera);
        }

        if self.options.file_type {
            let folder = attributes.kind.folder_name().unwrap_or(UNKNOWN_TYPE);
            segments.push(folder.to_string());
        }

        if self.options.location {
            let cell = attributes
                .location
                .map(|point| grid_cell(point, self.location_precision))
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
            segments.push(cell);
        }

        if self.options.orientation {
            let folder = attributes
                .orientation
                .map(|o| o.folder_name())
                .unwrap_or(UNKNOWN_ORIENTATION);
            segments.push(folder.to_string());
        }

        segments
    }

    /// Segments shared by both members of a live-photo pair, from the still
    pub fn pair_segments(&self, still: &MediaAttributes) -> Vec<String> {
        let mut segments = self.segments(still);
        segments.push(LIVE_PHOTOS_FOLDER.to_string());
        segments
    }

    /// Root the segments are joined onto for `record`
    pub fn destination_root<'a>(&'a self, record: &'a FileRecord) -> &'a Path {
        self.destination.as_deref().unwrap_or(record.root.as_path())
    }

    /// `<root>/<segments...>/<file name>`
    pub fn candidate(&self, record: &FileRecord, segments: &[String]) -> Option<PathBuf> {
        let mut path = self.destination_root(record).to_path_buf();
        path.extend(segments);
        path.push(record.file_name()?);
        Some(path)
    }
}

/// Folder-safe form of a free-text value; `None` when nothing usable remains
pub fn sanitize_segment(value: &str) -> Option<String> {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || PATH_HOSTILE.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_end_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Grid cell such as `37.8N_122.4W`; coordinates are truncated toward zero
pub fn grid_cell(point: GeoPoint, precision: u8) -> String {
    let precision = usize::from(precision);
    let scale = 10f64.powi(precision as i32);
    let cell = |value: f64| (value.abs() * scale + 1e-9).trunc() / scale;

    let ns = if point.latitude < 0.0 { 'S' } else { 'N' };
    let ew = if point.longitude < 0.0 { 'W' } else { 'E' };
    format!(
        "{:.p$}{}_{:.p$}{}",
        cell(point.latitude),
        ns,
        cell(point.longitude),
        ew,
        p = precision
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CaptureDate, DateSource, MediaKind, Orientation};
    use chrono::NaiveDate;

    fn attributes() -> MediaAttributes {
        MediaAttributes {
            kind: MediaKind::Photo,
            capture_date: Some(CaptureDate {
                timestamp: NaiveDate::from_ymd_opt(2023, 5, 14)
                    .unwrap()
                    .and_hms_opt(10, 15, 0)
                    .unwrap(),
                source: DateSource::Exif,
            }),
            camera_model: Some("Canon EOS R5".into()),
            location: Some(GeoPoint {
                latitude: 37.8199,
                longitude: -122.4783,
            }),
            orientation: Some(Orientation::Landscape),
            live_photo_key: None,
        }
    }

    fn planner(options: SortOptions) -> PathPlanner {
        let mut config = SortConfig::new(vec![PathBuf::from("/photos")]);
        config.sort_options = options;
        PathPlanner::new(&config)
    }

    fn all_options() -> SortOptions {
        SortOptions {
            exif_date: true,
            camera_model: true,
            file_type: true,
            location: true,
            orientation: true,
            ..SortOptions::default()
        }
    }

    #[test]
    fn test_canonical_segment_order() {
        let segments = planner(all_options()).segments(&attributes());
        assert_eq!(
            segments,
            vec!["2023", "05", "Canon_EOS_R5", "Photos", "37.8N_122.4W", "Landscape"]
        );
    }

    #[test]
    fn test_missing_values_use_sentinels() {
        let bare = MediaAttributes::bare(MediaKind::Unsupported);
        let segments = planner(all_options()).segments(&bare);
        assert_eq!(
            segments,
            vec![
                UNKNOWN_DATE,
                UNKNOWN_CAMERA,
                UNKNOWN_TYPE,
                UNKNOWN_LOCATION,
                UNKNOWN_ORIENTATION
            ]
        );
    }

    #[test]
    fn test_no_options_means_no_segments() {
        assert!(planner(SortOptions::default()).segments(&attributes()).is_empty());
    }

    #[test]
    fn test_date_layouts() {
        let options = SortOptions {
            exif_date: true,
            ..SortOptions::default()
        };
        let mut config = SortConfig::new(vec![PathBuf::from("/photos")]);
        config.sort_options = options;

        config.month_format = MonthFormat::Combined;
        assert_eq!(PathPlanner::new(&config).segments(&attributes()), vec!["2023-05"]);

        config.date_granularity = DateGranularity::Year;
        assert_eq!(PathPlanner::new(&config).segments(&attributes()), vec!["2023"]);
    }

    #[test]
    fn test_planner_is_deterministic() {
        let planner = planner(all_options());
        let first = planner.segments(&attributes());
        for _ in 0..10 {
            assert_eq!(planner.segments(&attributes()), first);
        }
    }

    #[test]
    fn test_pair_segments_end_with_live_photos() {
        let options = SortOptions {
            exif_date: true,
            live_photos: true,
            ..SortOptions::default()
        };
        let segments = planner(options).pair_segments(&attributes());
        assert_eq!(segments, vec!["2023", "05", LIVE_PHOTOS_FOLDER]);
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("iPhone 15 Pro").as_deref(), Some("iPhone_15_Pro"));
        assert_eq!(sanitize_segment("NIKON D850/a:b").as_deref(), Some("NIKON_D850_a_b"));
        assert_eq!(sanitize_segment("Model."), Some("Model".to_string()));
        assert_eq!(sanitize_segment("   "), None);
        assert_eq!(sanitize_segment("///"), None);
    }

    #[test]
    fn test_grid_cell() {
        let point = GeoPoint {
            latitude: -33.8688,
            longitude: 151.2093,
        };
        assert_eq!(grid_cell(point, 1), "33.8S_151.2E");
        assert_eq!(grid_cell(point, 0), "33S_151E");
        assert_eq!(grid_cell(point, 2), "33.86S_151.20E");

        // Exact decimals are not pushed down by float error
        let exact = GeoPoint {
            latitude: 37.8,
            longitude: 0.3,
        };
        assert_eq!(grid_cell(exact, 1), "37.8N_0.3E");
    }

    #[test]
    fn test_candidate_uses_destination_or_root() {
        let record = FileRecord {
            path: PathBuf::from("/photos/in/IMG_0001.jpg"),
            root: PathBuf::from("/photos"),
            size: 1,
            modified: None,
            fingerprint: None,
            attributes: attributes(),
        };
        let segments = vec!["2023".to_string(), "Canon".to_string()];

        let planner = planner(SortOptions::default());
        assert_eq!(
            planner.candidate(&record, &segments).unwrap(),
            PathBuf::from("/photos/2023/Canon/IMG_0001.jpg")
        );

        let mut config = SortConfig::new(vec![PathBuf::from("/photos")]);
        config.destination = Some(PathBuf::from("/library"));
        assert_eq!(
            PathPlanner::new(&config).candidate(&record, &segments).unwrap(),
            PathBuf::from("/library/2023/Canon/IMG_0001.jpg")
        );
    }
}
