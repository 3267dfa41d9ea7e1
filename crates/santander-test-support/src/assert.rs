//! Assertions over lifecycle events.

use std::time::Duration;

use anyhow::{Result, anyhow};
use santander_events::{Event, EventStream};
use tokio::time::timeout;
use uuid::Uuid;

/// Default wait for a single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Collect events from `stream` until `done` returns true for one of them.
///
/// # Errors
///
/// Returns an error if the stream closes or no matching event arrives in time.
pub async fn collect_until<F>(stream: &mut EventStream, mut done: F) -> Result<Vec<Event>>
where
    F: FnMut(&Event) -> bool,
{
    let mut events = Vec::new();
    loop {
        let envelope = timeout(EVENT_TIMEOUT, stream.next())
            .await
            .map_err(|_| anyhow!("timed out waiting for event"))?
            .ok_or_else(|| anyhow!("event stream closed"))?;
        let finished = done(&envelope.event);
        events.push(envelope.event);
        if finished {
            return Ok(events);
        }
    }
}

/// Stage labels recorded for `operation_id`, in publication order.
#[must_use]
pub fn stages_for(events: &[Event], operation_id: Uuid) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::OperationStage {
                operation_id: id,
                stage,
            } if *id == operation_id => Some(stage.clone()),
            _ => None,
        })
        .collect()
}
