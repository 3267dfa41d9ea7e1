//! Parsing helpers shared by the loader.

use std::path::{Component, Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::model::OverlapPolicy;

const LOG_FORMATS: &[&str] = &["json", "pretty", "text"];

/// Parse an octal mode such as `755`, `0755` or `0o755`.
///
/// # Errors
///
/// Returns an error when the value is not octal or exceeds `0o7777`.
pub fn parse_octal_mode(field: &'static str, value: &str) -> ConfigResult<u32> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| ConfigError::invalid(field, value, "not_octal"))?;
    if mode > 0o7777 {
        return Err(ConfigError::invalid(field, value, "out_of_range"));
    }
    Ok(mode)
}

/// Parse the overlap policy name.
///
/// # Errors
///
/// Returns an error for names other than `serialize` and `reject`.
pub fn parse_overlap_policy(value: &str) -> ConfigResult<OverlapPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "serialize" | "queue" => Ok(OverlapPolicy::Serialize),
        "reject" => Ok(OverlapPolicy::Reject),
        _ => Err(ConfigError::invalid("overlap_policy", value, "unknown_policy")),
    }
}

/// Validate a log format name without interpreting it.
///
/// # Errors
///
/// Returns an error for unknown format names.
pub fn validate_log_format(value: &str) -> ConfigResult<String> {
    let normalized = value.trim().to_ascii_lowercase();
    if LOG_FORMATS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(ConfigError::invalid("log_format", value, "unknown_format"))
    }
}

/// Require an absolute path without `.` or `..` components.
///
/// # Errors
///
/// Returns an error for relative or non-normalised paths.
pub fn require_absolute(field: &'static str, path: &Path) -> ConfigResult<PathBuf> {
    if !path.is_absolute() {
        return Err(ConfigError::invalid(field, path.display().to_string(), "not_absolute"));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir | Component::CurDir))
    {
        return Err(ConfigError::invalid(field, path.display().to_string(), "not_normalised"));
    }
    Ok(path.to_path_buf())
}

/// Parse a positive integer.
///
/// # Errors
///
/// Returns an error for non-numeric or zero values.
pub fn parse_positive(field: &'static str, value: &str) -> ConfigResult<u64> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(field, value, "zero")),
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(ConfigError::invalid(field, value, "not_a_number")),
    }
}

/// Split a colon separated list of roots.
#[must_use]
pub fn split_roots(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_modes_accept_common_spellings() -> ConfigResult<()> {
        assert_eq!(parse_octal_mode("file_mode", "644")?, 0o644);
        assert_eq!(parse_octal_mode("file_mode", "0755")?, 0o755);
        assert_eq!(parse_octal_mode("dir_mode", "0o700")?, 0o700);
        Ok(())
    }

    #[test]
    fn octal_modes_reject_garbage() {
        assert!(matches!(
            parse_octal_mode("file_mode", "rwx"),
            Err(ConfigError::InvalidField {
                reason: "not_octal",
                ..
            })
        ));
        assert!(matches!(
            parse_octal_mode("file_mode", "17777"),
            Err(ConfigError::InvalidField {
                reason: "out_of_range",
                ..
            })
        ));
    }

    #[test]
    fn policies_and_formats_parse() -> ConfigResult<()> {
        assert_eq!(parse_overlap_policy("Reject")?, OverlapPolicy::Reject);
        assert_eq!(parse_overlap_policy("serialize")?, OverlapPolicy::Serialize);
        assert!(parse_overlap_policy("yolo").is_err());
        assert_eq!(validate_log_format("JSON")?, "json");
        assert!(validate_log_format("xml").is_err());
        Ok(())
    }

    #[test]
    fn paths_must_be_absolute_and_normalised() {
        assert!(require_absolute("socket_path", Path::new("/var/run/h.sock")).is_ok());
        assert!(require_absolute("socket_path", Path::new("run/h.sock")).is_err());
        assert!(require_absolute("allowed_roots", Path::new("/var/../etc")).is_err());
    }

    #[test]
    fn numbers_and_lists() -> ConfigResult<()> {
        assert_eq!(parse_positive("connect_timeout_ms", "250")?, 250);
        assert!(parse_positive("event_capacity", "0").is_err());
        assert!(parse_positive("event_capacity", "lots").is_err());
        assert_eq!(
            split_roots("/var/mobile: /var/tmp ::"),
            vec![PathBuf::from("/var/mobile"), PathBuf::from("/var/tmp")]
        );
        Ok(())
    }
}
