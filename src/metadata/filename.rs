//! Capture dates embedded in file names

use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::trace;

/// A file name pattern; capture groups are year, month, day and,
/// when `has_time` is set, hour, minute, second
struct DatePattern {
    name: &'static str,
    regex: Regex,
    has_time: bool,
}

static PATTERNS: OnceLock<Vec<DatePattern>> = OnceLock::new();

fn patterns() -> &'static [DatePattern] {
    PATTERNS.get_or_init(|| {
        let table: [(&'static str, &'static str, bool); 6] = [
            // IMG_20240115_143000, PXL_20240115_143000123
            (
                "camera",
                r"(?:IMG|VID|PXL|DSC|MVI|DJI|GOPR)[-_]?(\d{4})(\d{2})(\d{2})[-_]?(\d{2})(\d{2})(\d{2})",
                true,
            ),
            // Screenshot 2024-01-15 at 14.30.00
            (
                "screenshot",
                r"(?i)(?:screenshot|screen shot)[-_\s]*(\d{4})[-_]?(\d{2})[-_]?(\d{2})[-_\s]*(?:at[-_\s]*)?(\d{1,2})[-_.]?(\d{2})[-_.]?(\d{2})",
                true,
            ),
            // 20240115_143000
            (
                "compact",
                r"(\d{4})(\d{2})(\d{2})[_\-](\d{2})(\d{2})(\d{2})",
                true,
            ),
            // 2024-01-15 14.30.00, 2024-01-15_14-30-00
            (
                "separated",
                r"(\d{4})[-_](\d{2})[-_](\d{2})[-_\sT](\d{2})[-_.:](\d{2})[-_.:](\d{2})",
                true,
            ),
            // IMG-20240115-WA0001
            ("whatsapp", r"(?:IMG|VID)-(\d{4})(\d{2})(\d{2})-WA\d+", false),
            // 2024-01-15 or 20240115
            ("date", r"(\d{4})-?(\d{2})-?(\d{2})", false),
        ];

        table
            .into_iter()
            .map(|(name, pattern, has_time)| DatePattern {
                name,
                regex: Regex::new(pattern).expect("built-in date pattern is valid"),
                has_time,
            })
            .collect()
    })
}

/// Parse a capture date from a file name, trying the most specific patterns first
pub fn parse_filename_date(filename: &str) -> Option<NaiveDateTime> {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    };

    for pattern in patterns() {
        for caps in pattern.regex.captures_iter(stem) {
            if let Some(dt) = build_datetime(&caps, pattern.has_time) {
                trace!(filename, pattern = pattern.name, "Matched filename date pattern");
                return Some(dt);
            }
        }
    }

    None
}

fn build_datetime(caps: &Captures<'_>, has_time: bool) -> Option<NaiveDateTime> {
    let field = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };

    let year = field(1)? as i32;
    if !(1990..=2100).contains(&year) {
        return None;
    }

    let (hour, minute, second) = if has_time {
        (field(4)?, field(5)?, field(6)?)
    } else {
        (0, 0, 0)
    };

    NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_compact_format() {
        let dt = parse_filename_date("20240115_143000.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 1, 15));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (14, 30, 0));

        let dt = parse_filename_date("20240115-143000.jpg").unwrap();
        assert_eq!(dt.year(), 2024);
    }

    #[test]
    fn test_camera_prefixes() {
        for name in [
            "IMG_20240115_143000.jpg",
            "VID_20240115_143000.mp4",
            "PXL_20240115_143000123.jpg",
        ] {
            let dt = parse_filename_date(name).unwrap();
            assert_eq!(dt.year(), 2024, "{name}");
            assert_eq!(dt.hour(), 14, "{name}");
        }
    }

    #[test]
    fn test_screenshot_format() {
        let dt = parse_filename_date("Screenshot 2023-05-14 at 10.15.42.png").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 5, 14));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (10, 15, 42));
    }

    #[test]
    fn test_whatsapp_format() {
        let dt = parse_filename_date("IMG-20240115-WA0001.jpg").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 1, 15));
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn test_separated_format() {
        let dt = parse_filename_date("2024-01-15_14-30-00.jpg").unwrap();
        assert_eq!(dt.minute(), 30);

        let dt = parse_filename_date("2024-01-15 14.30.00.mov").unwrap();
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn test_invalid_formats() {
        assert!(parse_filename_date("random_file.jpg").is_none());
        assert!(parse_filename_date("IMG_0001.jpg").is_none());
        assert!(parse_filename_date("19800101_000000.jpg").is_none());
        assert!(parse_filename_date("20241345_000000.jpg").is_none());
    }
}
