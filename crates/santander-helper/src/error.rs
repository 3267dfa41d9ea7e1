//! # Design
//!
//! - One error type for validation, execution and daemon start-up.
//! - Messages stay constant; operation, path and offending value travel as fields.
//! - `error_kind` is the single place where failures map onto the wire taxonomy.

use std::any::Any;
use std::io;
use std::path::PathBuf;

use santander_ops::ErrorKind;
use thiserror::Error;

/// Result alias for helper operations.
pub type HelperResult<T> = Result<T, HelperError>;

/// Errors produced by the helper.
#[derive(Debug, Error)]
pub enum HelperError {
    /// IO failures while interacting with the filesystem.
    #[error("helper io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("helper walkdir failure")]
    Walkdir {
        /// Operation that triggered the traversal.
        operation: &'static str,
        /// Root of the traversal.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// JSON serialisation failures while writing outputs.
    #[error("helper json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path being written.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The descriptor failed validation.
    #[error("invalid request")]
    InvalidRequest {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Another operation holds an overlapping path and the policy rejects waiting.
    #[error("destination is in use by another operation")]
    DestinationInUse {
        /// First touched path of the rejected operation.
        path: PathBuf,
    },
    /// User lookup failed when applying ownership changes.
    #[error("user lookup failed")]
    UserLookup {
        /// User that failed lookup.
        user: String,
        /// Underlying nix error, absent when the user does not exist.
        source: Option<nix::Error>,
    },
    /// Group lookup failed when applying ownership changes.
    #[error("group lookup failed")]
    GroupLookup {
        /// Group that failed lookup.
        group: String,
        /// Underlying nix error, absent when the group does not exist.
        source: Option<nix::Error>,
    },
    /// Nix syscall failures.
    #[error("helper nix failure")]
    Nix {
        /// Operation that triggered the syscall.
        operation: &'static str,
        /// Path involved in the syscall.
        path: PathBuf,
        /// Underlying nix error.
        source: nix::Error,
    },
    /// An executor panicked or was cancelled.
    #[error("executor aborted")]
    ExecutorAborted {
        /// Panic payload or cancellation detail.
        detail: String,
    },
    /// Configuration could not be loaded.
    #[error("helper configuration failed")]
    Config {
        /// Source configuration error.
        source: santander_config::ConfigError,
    },
    /// Telemetry could not be initialised.
    #[error("helper telemetry failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: santander_telemetry::TelemetryError,
    },
}

impl HelperError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn nix(operation: &'static str, path: impl Into<PathBuf>, source: nix::Error) -> Self {
        Self::Nix {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: Option<String>) -> Self {
        Self::InvalidRequest {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn aborted(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "executor panicked".to_string());
        Self::ExecutorAborted { detail }
    }

    /// Wire classification of the failure.
    #[must_use]
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Io { source, .. } => ErrorKind::from_io(source),
            Self::Walkdir { source, .. } => source.io_error().map_or(ErrorKind::Io, ErrorKind::from_io),
            Self::Nix { source, .. } => ErrorKind::from_io(&io::Error::from(*source)),
            Self::InvalidRequest { .. } | Self::DestinationInUse { .. } => {
                ErrorKind::InvalidRequest
            }
            Self::Json { .. }
            | Self::UserLookup { .. }
            | Self::GroupLookup { .. }
            | Self::ExecutorAborted { .. }
            | Self::Config { .. }
            | Self::Telemetry { .. } => ErrorKind::Internal,
        }
    }

    /// Detail reported to the caller alongside the classification.
    #[must_use]
    pub fn failure_message(&self) -> String {
        match self {
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Walkdir {
                operation,
                path,
                source,
            } => format!("{operation} failed below {}: {source}", path.display()),
            Self::Json {
                operation, path, ..
            } => format!("{operation} could not serialise {}", path.display()),
            Self::Nix {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::InvalidRequest {
                field,
                reason,
                value: Some(value),
            } => format!("{field} rejected ({reason}): {value}"),
            Self::InvalidRequest {
                field,
                reason,
                value: None,
            } => format!("{field} rejected ({reason})"),
            Self::UserLookup { user, .. } => format!("owner '{user}' could not be resolved"),
            Self::GroupLookup { group, .. } => format!("group '{group}' could not be resolved"),
            Self::ExecutorAborted { detail } => format!("operation aborted: {detail}"),
            Self::DestinationInUse { .. } | Self::Config { .. } | Self::Telemetry { .. } => {
                self.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let err = HelperError::io(
            "extract.create_staging",
            "/var/mobile/out",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.error_kind(), ErrorKind::PermissionDenied);
        assert!(err.failure_message().contains("/var/mobile/out"));
        assert_eq!(err.to_string(), "helper io failure");
    }

    #[test]
    fn nix_errors_map_through_errno() {
        let err = HelperError::nix("permissions.chown", "/var/tmp/x", nix::Error::EACCES);
        assert_eq!(err.error_kind(), ErrorKind::PermissionDenied);
        let err = HelperError::nix("permissions.chown", "/var/tmp/x", nix::Error::ENOENT);
        assert_eq!(err.error_kind(), ErrorKind::NotFound);
    }

    #[test]
    fn invalid_requests_name_the_field() {
        let err = HelperError::invalid("destination", "outside_allowed_roots", Some("/etc".into()));
        assert_eq!(err.error_kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            err.failure_message(),
            "destination rejected (outside_allowed_roots): /etc"
        );
    }

    #[test]
    fn panic_payloads_become_details() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        match HelperError::aborted(payload.as_ref()) {
            HelperError::ExecutorAborted { detail } => assert_eq!(detail, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
