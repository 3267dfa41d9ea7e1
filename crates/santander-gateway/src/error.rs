//! # Design
//!
//! - Channel failures, helper refusals and operation failures stay distinct
//!   variants so callers can tell "did not run" from "may have run".
//! - `user_message` is the only place that produces alert text.

use std::path::PathBuf;

use santander_ops::{ErrorKind, ExecutionResult};
use thiserror::Error;

use crate::channel::ChannelError;

/// Successful outcome delivered to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutput {
    /// Path the operation produced, if any.
    pub artifact: Option<PathBuf>,
}

/// Everything a caller can be told about a failed submission.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The helper could not be reached or the session broke.
    #[error("helper channel failed")]
    Channel {
        /// Underlying channel error.
        #[from]
        source: ChannelError,
    },
    /// The helper refused the request without touching the filesystem.
    #[error("operation request was rejected")]
    InvalidRequest {
        /// Helper-supplied detail.
        message: String,
    },
    /// The helper attempted the operation and it failed.
    #[error("operation failed")]
    Operation {
        /// Failure classification.
        kind: ErrorKind,
        /// Helper-supplied detail.
        message: String,
    },
    /// The caller-side task failed unexpectedly.
    #[error("operation runner failed")]
    Internal {
        /// Panic or cancellation detail.
        message: String,
    },
}

impl GatewayError {
    /// Text suitable for an alert shown to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Channel { source } => match source {
                ChannelError::Connect { .. } => {
                    "The privileged helper is not running or could not be reached.".to_string()
                }
                ChannelError::ConnectTimeout { .. } => {
                    "Timed out connecting to the privileged helper.".to_string()
                }
                ChannelError::Disconnected { .. } => {
                    "Lost contact with the privileged helper. The operation may or may not have completed."
                        .to_string()
                }
                ChannelError::NotSent { .. } => {
                    "Lost contact with the privileged helper before the operation was sent. Nothing was changed."
                        .to_string()
                }
                ChannelError::Encode { .. } => {
                    "The operation could not be sent to the privileged helper.".to_string()
                }
            },
            Self::InvalidRequest { message } => format!("The helper refused the operation: {message}"),
            Self::Operation { kind, message } => {
                format!("The operation failed ({}): {message}", kind.as_str())
            }
            Self::Internal { message } => format!("Unexpected error: {message}"),
        }
    }

    /// Whether the operation may have run even though no result arrived.
    #[must_use]
    pub const fn outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::Channel {
                source: ChannelError::Disconnected { .. }
            }
        )
    }

    /// Failure classification reported by the helper, when there is one.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidRequest { .. } => Some(ErrorKind::InvalidRequest),
            Self::Operation { kind, .. } => Some(*kind),
            Self::Channel { .. } | Self::Internal { .. } => None,
        }
    }
}

/// Fold a channel round trip into the caller-facing result.
pub(crate) fn into_output(
    submitted: Result<ExecutionResult, ChannelError>,
) -> Result<OperationOutput, GatewayError> {
    match submitted? {
        ExecutionResult::Success { artifact } => Ok(OperationOutput { artifact }),
        ExecutionResult::Failure {
            kind: ErrorKind::InvalidRequest,
            message,
        } => Err(GatewayError::InvalidRequest { message }),
        ExecutionResult::Failure { kind, message } => Err(GatewayError::Operation { kind, message }),
    }
}
