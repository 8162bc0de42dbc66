//! Configuration payload for a sort session
//!
//! The host hands the engine one payload per invocation. It is decoded once,
//! strictly: unknown fields and wrong types are protocol errors.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Organizing dimensions switched on by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SortOptions {
    /// Group by capture date
    pub exif_date: bool,
    /// Group by camera model
    pub camera_model: bool,
    /// Group by media kind (Photos, Videos, ...)
    pub file_type: bool,
    /// Group by GPS grid cell
    pub location: bool,
    /// Group by landscape/portrait
    pub orientation: bool,
    /// Keep still images and their motion clips together
    pub live_photos: bool,
    /// Skip files whose content was already seen in this session
    pub deduplication: bool,
}

/// File operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    /// Move files to destination
    #[default]
    Move,
    /// Copy files to destination, leaving the source in place
    Copy,
}

/// What to do when the planned destination is already occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Append " (n)" to the file stem until the name is free
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
}

/// How much of the capture date becomes folders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DateGranularity {
    /// YYYY/
    Year,
    /// YYYY/MM/ or YYYY-MM/
    #[default]
    YearMonth,
}

/// Month format for year-month grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonthFormat {
    /// Nested format: YYYY/MM/
    #[default]
    Nested,
    /// Combined format: YYYY-MM/
    Combined,
}

/// Largest accepted `locationPrecision`
pub const MAX_LOCATION_PRECISION: u8 = 4;

/// Full payload of a sort invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SortConfig {
    /// Folders to scan for media files
    pub folders: Vec<PathBuf>,

    /// Enabled organizing dimensions
    #[serde(default)]
    pub sort_options: SortOptions,

    /// Move or copy
    #[serde(default)]
    pub file_operation: FileOperation,

    /// Rename or overwrite on conflicts
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    /// Root of the organized tree. When absent, each file is organized
    /// inside the folder it was found in.
    #[serde(default)]
    pub destination: Option<PathBuf>,

    /// Where the undo journal is written
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,

    /// Date folder depth
    #[serde(default)]
    pub date_granularity: DateGranularity,

    /// Date folder layout for year-month grouping
    #[serde(default)]
    pub month_format: MonthFormat,

    /// Decimal places of the location grid cell
    #[serde(default = "default_location_precision")]
    pub location_precision: u8,

    /// Directories to skip while scanning (folder names or absolute paths)
    #[serde(default)]
    pub exclude: Vec<PathBuf>,

    /// Worker threads for metadata extraction and hashing (0 = auto)
    #[serde(default)]
    pub threads: usize,
}

fn default_location_precision() -> u8 {
    1
}

impl SortConfig {
    /// Build a config with defaults for everything but the folders
    pub fn new(folders: Vec<PathBuf>) -> Self {
        Self {
            folders,
            sort_options: SortOptions::default(),
            file_operation: FileOperation::default(),
            conflict_resolution: ConflictResolution::default(),
            destination: None,
            journal_dir: None,
            date_granularity: DateGranularity::default(),
            month_format: MonthFormat::default(),
            location_precision: default_location_precision(),
            exclude: vec![],
            threads: 0,
        }
    }

    /// Decode a JSON payload and check its values
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: SortConfig =
            serde_json::from_str(payload).map_err(|e| Error::Protocol(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Decode a TOML payload and check its values
    pub fn from_toml(payload: &str) -> Result<Self> {
        let config: SortConfig =
            toml::from_str(payload).map_err(|e| Error::Protocol(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a payload file, picking the format from its extension
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Protocol(format!("cannot read payload file '{}': {}", path.display(), e))
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Reject values that decode fine but make no sense
    pub fn validate(&self) -> Result<()> {
        if self.location_precision > MAX_LOCATION_PRECISION {
            return Err(Error::Protocol(format!(
                "locationPrecision must be between 0 and {}, got {}",
                MAX_LOCATION_PRECISION, self.location_precision
            )));
        }
        if self.folders.iter().any(|f| f.as_os_str().is_empty()) {
            return Err(Error::Protocol("folders must not contain empty paths".into()));
        }
        Ok(())
    }

    /// Journal directory, using `~/.sortwise/journals` if not specified
    pub fn journal_dir(&self) -> PathBuf {
        self.journal_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".sortwise")
                .join("journals")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_payload_uses_defaults() {
        let config = SortConfig::from_json(r#"{"folders": ["/photos"]}"#).unwrap();
        assert_eq!(config.folders, vec![PathBuf::from("/photos")]);
        assert_eq!(config.file_operation, FileOperation::Move);
        assert_eq!(config.conflict_resolution, ConflictResolution::Rename);
        assert_eq!(config.date_granularity, DateGranularity::YearMonth);
        assert_eq!(config.location_precision, 1);
        assert_eq!(config.sort_options, SortOptions::default());
    }

    #[test]
    fn test_full_payload() {
        let payload = r#"{
            "folders": ["/a", "/b"],
            "sortOptions": {
                "exifDate": true,
                "cameraModel": true,
                "fileType": false,
                "location": false,
                "orientation": true,
                "livePhotos": true,
                "deduplication": true
            },
            "fileOperation": "copy",
            "conflictResolution": "overwrite",
            "dateGranularity": "year",
            "monthFormat": "combined"
        }"#;
        let config = SortConfig::from_json(payload).unwrap();
        assert!(config.sort_options.exif_date);
        assert!(config.sort_options.camera_model);
        assert!(!config.sort_options.file_type);
        assert!(config.sort_options.deduplication);
        assert_eq!(config.file_operation, FileOperation::Copy);
        assert_eq!(config.conflict_resolution, ConflictResolution::Overwrite);
        assert_eq!(config.date_granularity, DateGranularity::Year);
        assert_eq!(config.month_format, MonthFormat::Combined);
    }

    #[test]
    fn test_unknown_field_is_protocol_error() {
        let err = SortConfig::from_json(r#"{"folders": [], "colour": "red"}"#).unwrap_err();
        assert!(err.is_protocol());

        let err =
            SortConfig::from_json(r#"{"folders": [], "sortOptions": {"faces": true}}"#).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_malformed_payloads_are_protocol_errors() {
        for payload in [
            "not json",
            r#"{"sortOptions": {}}"#,
            r#"{"folders": "/single"}"#,
            r#"{"folders": [], "fileOperation": "teleport"}"#,
            r#"{"folders": [], "locationPrecision": 9}"#,
        ] {
            let err = SortConfig::from_json(payload).unwrap_err();
            assert!(err.is_protocol(), "payload {payload:?} gave {err}");
        }
    }

    #[test]
    fn test_toml_payload() {
        let payload = r#"
folders = ["/photos"]
fileOperation = "copy"

[sortOptions]
exifDate = true
"#;
        let config = SortConfig::from_toml(payload).unwrap();
        assert!(config.sort_options.exif_date);
        assert_eq!(config.file_operation, FileOperation::Copy);
    }

    #[test]
    fn test_journal_dir_override() {
        let mut config = SortConfig::new(vec![PathBuf::from("/photos")]);
        config.journal_dir = Some(PathBuf::from("/tmp/journals"));
        assert_eq!(config.journal_dir(), PathBuf::from("/tmp/journals"));
    }
}
