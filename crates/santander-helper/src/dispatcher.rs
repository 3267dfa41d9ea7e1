//! Stage machine that turns one decoded request into exactly one result.
//!
//! # Design
//! - Every request walks `Received → Validating → Executing → Completed`;
//!   a request that fails validation goes straight to `Completed`.
//! - Touched paths are claimed after validation, keyed by their resolved
//!   parent, and released only once the request has reached `Completed`.
//! - Filesystem work runs on the blocking pool; a panicking executor yields an
//!   `Internal` failure instead of taking the connection down.
//! - Each transition is published on the event bus, counted and logged.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use santander_config::{HelperConfig, OverlapPolicy};
use santander_events::{Event, EventBus};
use santander_ops::{ErrorKind, ExecutionResult, OperationDescriptor, OperationKind};
use santander_telemetry::{Metrics, operation_span};
use tokio::task;
use tracing::{Instrument, Span, debug, info, warn};
use uuid::Uuid;

use crate::error::{HelperError, HelperResult};
use crate::execute::Executor;
use crate::locks::{DestinationGuard, DestinationLocks};
use crate::validate::{lock_key, validate};

const HEALTH_COMPONENT: &str = "helper_dispatcher";

/// Lifecycle stage of one request inside the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    /// Decoded and accepted by the dispatcher.
    Received,
    /// Being checked against the allowed roots.
    Validating,
    /// Mutating the filesystem.
    Executing,
    /// A result has been produced.
    Completed,
}

impl DispatchStage {
    /// Stable label used in events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Completed => "completed",
        }
    }

    const fn may_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Validating)
                | (Self::Validating, Self::Executing | Self::Completed)
                | (Self::Executing, Self::Completed)
        )
    }
}

struct StageTracker {
    current: DispatchStage,
}

impl StageTracker {
    const fn new() -> Self {
        Self {
            current: DispatchStage::Received,
        }
    }

    fn advance(&mut self, next: DispatchStage) {
        debug_assert!(
            self.current.may_advance_to(next),
            "illegal stage transition {} -> {}",
            self.current.as_str(),
            next.as_str()
        );
        self.current = next;
    }
}

/// Helper-side dispatcher shared by every connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    allowed_roots: Vec<PathBuf>,
    policy: OverlapPolicy,
    executor: Executor,
    locks: Arc<DestinationLocks>,
    events: EventBus,
    metrics: Metrics,
    health_degraded: Mutex<bool>,
}

impl Dispatcher {
    /// Build a dispatcher for the roots, policy and permissions in `config`.
    #[must_use]
    pub fn new(config: &HelperConfig, events: EventBus, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                allowed_roots: config.allowed_roots.clone(),
                policy: config.overlap_policy,
                executor: Executor::new(config.permissions.clone()),
                locks: DestinationLocks::new(),
                events,
                metrics,
                health_degraded: Mutex::new(false),
            }),
        }
    }

    /// Event bus the dispatcher publishes lifecycle events on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Metrics the dispatcher records into.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Process one request and produce its single result.
    pub async fn dispatch(
        &self,
        operation_id: Uuid,
        descriptor: OperationDescriptor,
    ) -> ExecutionResult {
        let span = operation_span(operation_id, descriptor.kind().as_str());
        self.run(operation_id, descriptor).instrument(span).await
    }

    async fn run(&self, operation_id: Uuid, descriptor: OperationDescriptor) -> ExecutionResult {
        let kind = descriptor.kind();
        let mut stages = StageTracker::new();
        self.inner.metrics.operation_started();
        self.inner.metrics.inc_helper_stage(DispatchStage::Received.as_str());
        self.inner.events.publish(Event::OperationReceived {
            operation_id,
            kind: kind.as_str().to_string(),
        });
        debug!("operation received");

        self.enter(&mut stages, operation_id, DispatchStage::Validating);
        let (outcome, guard) = match self.prepare(&descriptor).await {
            Ok(guard) => {
                self.enter(&mut stages, operation_id, DispatchStage::Executing);
                (self.execute(descriptor).await, Some(guard))
            }
            Err(err) => (Err(err), None),
        };

        self.enter(&mut stages, operation_id, DispatchStage::Completed);
        let result = self.finish(operation_id, kind, outcome);
        drop(guard);
        self.inner.metrics.operation_finished();
        result
    }

    fn enter(&self, stages: &mut StageTracker, operation_id: Uuid, stage: DispatchStage) {
        stages.advance(stage);
        self.inner.metrics.inc_helper_stage(stage.as_str());
        self.inner.events.publish(Event::OperationStage {
            operation_id,
            stage: stage.as_str().to_string(),
        });
        debug!(stage = stage.as_str(), "operation stage entered");
    }

    async fn prepare(&self, descriptor: &OperationDescriptor) -> HelperResult<DestinationGuard> {
        validate(descriptor, &self.inner.allowed_roots)?;
        let paths: Vec<PathBuf> = descriptor
            .touched_paths()
            .into_iter()
            .map(lock_key)
            .collect();

        match self.inner.policy {
            OverlapPolicy::Serialize => {
                let (guard, waited) = self.inner.locks.acquire(&paths).await;
                if waited {
                    self.inner.metrics.inc_destination_wait();
                    debug!("waited for an overlapping operation");
                }
                Ok(guard)
            }
            OverlapPolicy::Reject => self.inner.locks.try_acquire(&paths).ok_or_else(|| {
                HelperError::DestinationInUse {
                    path: paths.first().cloned().unwrap_or_default(),
                }
            }),
        }
    }

    async fn execute(&self, descriptor: OperationDescriptor) -> HelperResult<Option<PathBuf>> {
        let inner = Arc::clone(&self.inner);
        let span = Span::current();
        let joined =
            task::spawn_blocking(move || span.in_scope(|| inner.executor.run(&descriptor))).await;
        match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err(HelperError::aborted(&*err.into_panic())),
            Err(_) => Err(HelperError::ExecutorAborted {
                detail: "executor cancelled".to_string(),
            }),
        }
    }

    fn finish(
        &self,
        operation_id: Uuid,
        kind: OperationKind,
        outcome: HelperResult<Option<PathBuf>>,
    ) -> ExecutionResult {
        let result = match outcome {
            Ok(artifact) => {
                let shown = artifact.as_ref().map(|path| path.display().to_string());
                info!(artifact = shown.as_deref().unwrap_or("-"), "operation completed");
                self.inner.events.publish(Event::OperationCompleted {
                    operation_id,
                    artifact: shown,
                });
                self.mark_recovered();
                ExecutionResult::success(artifact)
            }
            Err(err) => {
                let error_kind = err.error_kind();
                let message = err.failure_message();
                warn!(kind = error_kind.as_str(), detail = %message, "operation failed");
                self.inner.events.publish(Event::OperationFailed {
                    operation_id,
                    kind: error_kind.as_str().to_string(),
                    message: message.clone(),
                });
                if matches!(error_kind, ErrorKind::Io | ErrorKind::Internal) {
                    self.mark_degraded(&message);
                }
                ExecutionResult::failure(error_kind, message)
            }
        };
        self.inner
            .metrics
            .inc_operation(kind.as_str(), result.outcome_label());
        result
    }

    fn mark_degraded(&self, detail: &str) {
        let mut degraded = self.health();
        if *degraded {
            drop(degraded);
            warn!(component = HEALTH_COMPONENT, "helper still degraded: {detail}");
        } else {
            *degraded = true;
            drop(degraded);
            warn!(component = HEALTH_COMPONENT, "helper degraded: {detail}");
            self.inner.events.publish(Event::HealthChanged {
                degraded: vec![HEALTH_COMPONENT.to_string()],
            });
        }
    }

    fn mark_recovered(&self) {
        let mut degraded = self.health();
        if std::mem::take(&mut *degraded) {
            drop(degraded);
            self.inner
                .events
                .publish(Event::HealthChanged { degraded: vec![] });
            info!(component = HEALTH_COMPONENT, "helper recovered");
        }
    }

    fn health(&self) -> MutexGuard<'_, bool> {
        self.inner
            .health_degraded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
