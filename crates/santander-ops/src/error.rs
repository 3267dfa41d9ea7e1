//! # Design
//!
//! - Decoding never yields a partially populated value: every rejection is one of these variants.
//! - Messages stay constant; the offending field, tag or version travels as context.

use thiserror::Error;

/// Reasons a payload could not be turned back into an operation or envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload ended before the document was complete.
    #[error("payload truncated")]
    Truncated {
        /// Underlying parser error.
        source: serde_json::Error,
    },
    /// The payload is not valid JSON.
    #[error("payload is not valid json")]
    Syntax {
        /// Underlying parser error.
        source: serde_json::Error,
    },
    /// A required field is absent or has the wrong shape.
    #[error("payload field malformed")]
    Malformed {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// A field is present but its contents do not deserialize.
    #[error("payload field invalid")]
    InvalidField {
        /// Field that failed to deserialize.
        field: &'static str,
        /// Underlying deserialization error.
        source: serde_json::Error,
    },
    /// The sender speaks a schema version outside the supported range.
    #[error("unsupported schema version")]
    UnsupportedVersion {
        /// Version found in the payload.
        found: u64,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },
    /// The operation object carries no `type` tag.
    #[error("operation tag missing")]
    MissingOperationTag,
    /// The operation tag is well formed but not one this build understands.
    #[error("unknown operation")]
    UnknownOperation {
        /// Tag found in the payload.
        tag: String,
    },
}

/// Reasons a value could not be serialised for the wire.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialisation failed, e.g. for a path that is not valid UTF-8.
    #[error("payload encoding failed")]
    Json {
        /// Payload being encoded.
        payload: &'static str,
        /// Underlying serialisation error.
        source: serde_json::Error,
    },
}

impl EncodeError {
    pub(crate) const fn json(payload: &'static str, source: serde_json::Error) -> Self {
        Self::Json { payload, source }
    }
}
