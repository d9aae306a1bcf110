//! Metadata extraction from grid file names.
//!
//! Provides layer labels, timestamps and variable units for grids named
//! after the PRISM convention (`PRISM_<var>_<stability>_<res>_<date>_bil`)
//! or any name carrying a compact `YYYYMMDD[HH[MM]]` stamp.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Metadata derived from a grid's file name.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub label: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// End of a date-only stamp's day
    pub end: Option<DateTime<Utc>>,
    pub variable: Option<String>,
    pub units: Option<String>,
}

/// File name without directories, `.gz`, or the final extension.
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let base = strip_suffix_ignore_case(base, ".gz").unwrap_or(base);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    if s.is_char_boundary(split) && s[split..].eq_ignore_ascii_case(suffix) {
        Some(&s[..split])
    } else {
        None
    }
}

/// True when the name looks like an ESRI ASCII grid (`.asc` / `.asc.gz`).
pub fn is_ascii_grid_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".asc") || lower.ends_with(".asc.gz")
}

/// Describe a grid file from its name.
pub fn describe_file(name: &str) -> FileMetadata {
    let stem = file_stem(name);
    let tokens: Vec<&str> = stem
        .split(|c: char| c == '_' || c == '-' || c == '.')
        .filter(|t| !t.is_empty())
        .collect();

    let stamp = tokens.iter().find_map(|t| parse_stamp(t));
    let variable = extract_variable(&tokens);
    let units = variable.as_deref().and_then(units_for_variable).map(str::to_string);

    let label = match stamp {
        Some((ts, false)) => ts.format("%Y-%m-%d").to_string(),
        Some((ts, true)) => ts.format("%Y-%m-%dT%H:%M").to_string(),
        None => stem.to_string(),
    };

    FileMetadata {
        label,
        timestamp: stamp.map(|(ts, _)| ts),
        end: match stamp {
            Some((ts, false)) => Some(ts + Duration::days(1)),
            _ => None,
        },
        variable,
        units,
    }
}

/// Parse `YYYYMMDD`, `YYYYMMDDHH` or `YYYYMMDDHHMM`.
///
/// The flag is true when the stamp carries a time of day.
fn parse_stamp(token: &str) -> Option<(DateTime<Utc>, bool)> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hour, minute) = match token.len() {
        8 => (0, 0),
        10 => (token[8..10].parse().ok()?, 0),
        12 => (token[8..10].parse().ok()?, token[10..12].parse().ok()?),
        _ => return None,
    };
    let year: i32 = token[0..4].parse().ok()?;
    let month: u32 = token[4..6].parse().ok()?;
    let day: u32 = token[6..8].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some((Utc.from_utc_datetime(&naive), token.len() > 8))
}

const KNOWN_VARIABLES: &[&str] = &[
    "ppt", "tmean", "tmin", "tmax", "tdmean", "vpdmin", "vpdmax",
];

fn extract_variable(tokens: &[&str]) -> Option<String> {
    let candidates = match tokens.first() {
        Some(first) if first.eq_ignore_ascii_case("prism") => &tokens[1..],
        _ => tokens,
    };
    candidates
        .iter()
        .take(1)
        .map(|t| t.to_lowercase())
        .find(|t| KNOWN_VARIABLES.contains(&t.as_str()))
}

/// Units for a PRISM variable.
pub fn units_for_variable(variable: &str) -> Option<&'static str> {
    match variable {
        "ppt" => Some("mm"),
        "tmean" | "tmin" | "tmax" | "tdmean" => Some("degC"),
        "vpdmin" | "vpdmax" => Some("hPa"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_prism_daily() {
        let meta = describe_file("PRISM_ppt_stable_4kmD2_20170101_bil.asc");
        assert_eq!(meta.label, "2017-01-01");
        assert_eq!(meta.variable.as_deref(), Some("ppt"));
        assert_eq!(meta.units.as_deref(), Some("mm"));
        assert_eq!(
            meta.timestamp,
            Some(Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(meta.end, Some(Utc.with_ymd_and_hms(2017, 1, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_prism_temperature_gz() {
        let meta = describe_file("/data/PRISM_tmax_provisional_4kmD2_20240315_bil.asc.gz");
        assert_eq!(meta.label, "2024-03-15");
        assert_eq!(meta.units.as_deref(), Some("degC"));
    }

    #[test]
    fn test_hourly_stamp() {
        let meta = describe_file("precip_2024031512.asc");
        assert_eq!(meta.label, "2024-03-15T12:00");
        assert_eq!(meta.timestamp.map(|t| t.hour()), Some(12));
        assert_eq!(meta.end, None);
        assert_eq!(meta.variable, None);
    }

    #[test]
    fn test_no_stamp_uses_stem() {
        let meta = describe_file("elevation.asc");
        assert_eq!(meta.label, "elevation");
        assert_eq!(meta.timestamp, None);
    }

    #[test]
    fn test_invalid_date_is_not_a_stamp() {
        assert_eq!(describe_file("grid_20171345.asc").label, "grid_20171345");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("a/b/c.asc.GZ"), "c");
        assert_eq!(file_stem("c.asc"), "c");
        assert_eq!(file_stem("noext"), "noext");
    }
}
