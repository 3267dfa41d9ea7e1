//! Correlated request/response wrappers exchanged over the helper channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::SCHEMA_VERSION;
use crate::descriptor::OperationDescriptor;
use crate::result::ExecutionResult;

/// A descriptor tagged with the identifier its response will carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Identifier echoed back in the matching [`ResponseEnvelope`].
    pub correlation_id: Uuid,
    /// Wire schema version of the sender.
    pub schema_version: u32,
    /// Operation to perform.
    pub operation: OperationDescriptor,
}

impl RequestEnvelope {
    /// Wrap `operation` under a fresh correlation identifier.
    #[must_use]
    pub fn new(operation: OperationDescriptor) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            operation,
        }
    }
}

/// The single outcome the helper reports for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Identifier copied from the request.
    pub correlation_id: Uuid,
    /// Wire schema version of the helper.
    pub schema_version: u32,
    /// What happened.
    pub outcome: ExecutionResult,
}

impl ResponseEnvelope {
    /// Response for `correlation_id`.
    #[must_use]
    pub const fn new(correlation_id: Uuid, outcome: ExecutionResult) -> Self {
        Self {
            correlation_id,
            schema_version: SCHEMA_VERSION,
            outcome,
        }
    }
}
