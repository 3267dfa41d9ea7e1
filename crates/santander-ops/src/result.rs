//! Outcome of a privileged operation as reported by the helper.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable failure classification carried across the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The helper refused the descriptor before touching the filesystem.
    InvalidRequest,
    /// The operating system denied access.
    PermissionDenied,
    /// A required path does not exist.
    NotFound,
    /// The destination already exists.
    AlreadyExists,
    /// The volume ran out of space.
    StorageFull,
    /// The volume is mounted read-only.
    ReadOnlyFilesystem,
    /// A directory that had to be empty was not.
    DirectoryNotEmpty,
    /// Any other I/O failure.
    Io,
    /// The helper failed internally, e.g. an executor panicked.
    Internal,
}

impl ErrorKind {
    /// Classify an I/O error.
    #[must_use]
    pub fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::StorageFull => Self::StorageFull,
            io::ErrorKind::ReadOnlyFilesystem => Self::ReadOnlyFilesystem,
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty,
            _ => Self::Io,
        }
    }

    /// Stable label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::StorageFull => "storage_full",
            Self::ReadOnlyFilesystem => "read_only_filesystem",
            Self::DirectoryNotEmpty => "directory_not_empty",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

/// Exactly-once outcome of one submitted descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The mutation completed.
    Success {
        /// Path produced by the operation, when it produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<PathBuf>,
    },
    /// The helper received the descriptor and it failed.
    Failure {
        /// Classification of the failure.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl ExecutionResult {
    /// Success carrying an optional artifact path.
    #[must_use]
    pub const fn success(artifact: Option<PathBuf>) -> Self {
        Self::Success { artifact }
    }

    /// Failure with the given classification.
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Metric label for the outcome.
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { kind, .. } => kind.as_str(),
        }
    }
}
