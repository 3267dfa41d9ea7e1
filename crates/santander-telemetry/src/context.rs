//! Span helpers that tie log lines to the process and to individual operations.

use tracing::{Span, span::Entered};
use uuid::Uuid;

use crate::init::build_sha;

/// Keeps the process-level span entered for the lifetime of the guard.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter a span carrying the process role and build SHA.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        let role = role.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("santander", role = %role, build_sha = %build_sha()),
        ));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Span wrapping everything logged while one operation is handled.
#[must_use]
pub fn operation_span(operation_id: Uuid, kind: &str) -> Span {
    tracing::info_span!("operation", operation_id = %operation_id, kind = %kind)
}
