//! Lifecycle events for privileged operations.
//!
//! The helper publishes one event per dispatcher stage so that tests, logs and
//! any attached observer see the same ordered history. The bus is a
//! `tokio::broadcast` channel paired with a bounded replay ring: late
//! subscribers can ask for everything after a known id, and when the ring is
//! full the oldest events are dropped first.
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};
use uuid::Uuid;

/// Identifier assigned to each published event.
pub type EventId = u64;

const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Events emitted while the helper processes operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A decoded request entered the dispatcher.
    OperationReceived {
        /// Correlation id of the request.
        operation_id: Uuid,
        /// Operation kind label.
        kind: String,
    },
    /// The dispatcher moved the operation to another stage.
    OperationStage {
        /// Correlation id of the request.
        operation_id: Uuid,
        /// Stage label.
        stage: String,
    },
    /// The operation succeeded.
    OperationCompleted {
        /// Correlation id of the request.
        operation_id: Uuid,
        /// Path produced by the operation, if any.
        artifact: Option<String>,
    },
    /// The operation failed.
    OperationFailed {
        /// Correlation id of the request.
        operation_id: Uuid,
        /// Failure classification label.
        kind: String,
        /// Failure detail.
        message: String,
    },
    /// The set of degraded components changed.
    HealthChanged {
        /// Components currently degraded; empty once recovered.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OperationReceived { .. } => "operation_received",
            Self::OperationStage { .. } => "operation_stage",
            Self::OperationCompleted { .. } => "operation_completed",
            Self::OperationFailed { .. } => "operation_failed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Operation the event belongs to, if it belongs to one.
    #[must_use]
    pub const fn operation_id(&self) -> Option<Uuid> {
        match self {
            Self::OperationReceived { operation_id, .. }
            | Self::OperationStage { operation_id, .. }
            | Self::OperationCompleted { operation_id, .. }
            | Self::OperationFailed { operation_id, .. } => Some(*operation_id),
            Self::HealthChanged { .. } => None,
        }
    }
}

/// Event plus its sequence id and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Sequential identifier, starting at 1.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    pub event: Event,
}

/// Cloneable handle to the shared bus.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Bus whose broadcast channel and replay ring both hold `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish `event`, returning its sequence id.
    ///
    /// Ids are assigned under the replay lock so the ring, the broadcast
    /// channel and the ids all agree on ordering.
    pub fn publish(&self, event: Event) -> EventId {
        let mut buffer = self.lock_buffer();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if buffer.len() == self.replay_capacity {
            buffer.pop_front();
        }
        buffer.push_back(envelope.clone());
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe, replaying buffered events newer than `since_id` first.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let buffer = self.lock_buffer();
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            buffer.iter().filter(|item| item.id > since).cloned().collect()
        });
        let receiver = self.sender.subscribe();
        drop(buffer);
        EventStream { backlog, receiver }
    }

    /// Identifier of the newest buffered event.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|event| event.id)
    }

    /// Snapshot of the replay ring, oldest first.
    #[must_use]
    pub fn backlog(&self) -> Vec<EventEnvelope> {
        self.lock_buffer().iter().cloned().collect()
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber yielding replayed events first, then live ones.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Next event, or `None` once every bus handle is gone.
    ///
    /// A subscriber that falls behind skips the events it missed and resumes
    /// with the oldest one still buffered by the channel.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    type TestResult<T> = anyhow::Result<T>;

    fn stage_event(index: u128, stage: &str) -> Event {
        Event::OperationStage {
            operation_id: Uuid::from_u128(index + 1),
            stage: stage.to_string(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);
        let mut last_id = 0;
        for index in 0..5 {
            last_id = bus.publish(stage_event(index, "validating"));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);
    }

    #[test]
    fn replay_ring_drops_oldest_first() {
        let bus = EventBus::with_capacity(2);
        for index in 0..3 {
            bus.publish(stage_event(index, "executing"));
        }
        let ids: Vec<_> = bus.backlog().iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn operation_events_expose_their_id() {
        let event = stage_event(6, "completed");
        assert_eq!(event.operation_id(), Some(Uuid::from_u128(7)));
        assert_eq!(event.kind(), "operation_stage");
        assert_eq!(
            Event::HealthChanged { degraded: vec![] }.operation_id(),
            None
        );
    }

    #[tokio::test]
    async fn concurrent_publishers_do_not_stall() -> TestResult<()> {
        let bus = EventBus::with_capacity(512);
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for index in 0..500 {
                    bus.publish(stage_event(index, "executing"));
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                match stream.next().await {
                    Some(event) => {
                        ids.insert(event.id);
                    }
                    None => break,
                }
            }
            ids
        });

        timeout(Duration::from_secs(5), publisher).await??;
        let ids = timeout(Duration::from_secs(5), consumer).await??;
        assert_eq!(ids.len(), 500);
        Ok(())
    }
}
