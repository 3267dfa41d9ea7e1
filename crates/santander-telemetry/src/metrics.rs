//! Prometheus registry for helper and channel activity.
//!
//! # Design
//! - Collector registration stays private; callers only see typed helpers.
//! - Labels are static strings supplied by the stage, kind and outcome enums.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Cloneable handle to the shared registry.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    helper_stages_total: IntCounterVec,
    operations_total: IntCounterVec,
    channel_connects_total: IntCounterVec,
    channel_disconnects_total: IntCounter,
    decode_failures_total: IntCounter,
    destination_waits_total: IntCounter,
    operations_in_flight: IntGauge,
}

/// Point-in-time view of the scalar collectors.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Operations currently held by the dispatcher.
    pub operations_in_flight: i64,
    /// Channel sessions lost while open.
    pub channel_disconnects_total: u64,
    /// Frames the helper could not decode.
    pub decode_failures_total: u64,
    /// Operations that waited for an overlapping destination to be released.
    pub destination_waits_total: u64,
}

impl Metrics {
    /// Registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let helper_stages_total = counter_vec(
            "helper_stages_total",
            "Dispatcher stage transitions by stage",
            &["stage"],
        )?;
        let operations_total = counter_vec(
            "operations_total",
            "Completed privileged operations by kind and outcome",
            &["kind", "outcome"],
        )?;
        let channel_connects_total = counter_vec(
            "channel_connects_total",
            "Helper channel connection attempts by result",
            &["result"],
        )?;
        let channel_disconnects_total = counter(
            "channel_disconnects_total",
            "Helper channel sessions lost while open",
        )?;
        let decode_failures_total = counter(
            "decode_failures_total",
            "Request frames the helper could not decode",
        )?;
        let destination_waits_total = counter(
            "destination_waits_total",
            "Operations that waited for an overlapping destination",
        )?;
        let operations_in_flight = IntGauge::with_opts(Opts::new(
            "operations_in_flight",
            "Operations currently held by the dispatcher",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "operations_in_flight",
            source,
        })?;

        register(&registry, "helper_stages_total", &helper_stages_total)?;
        register(&registry, "operations_total", &operations_total)?;
        register(&registry, "channel_connects_total", &channel_connects_total)?;
        register(&registry, "channel_disconnects_total", &channel_disconnects_total)?;
        register(&registry, "decode_failures_total", &decode_failures_total)?;
        register(&registry, "destination_waits_total", &destination_waits_total)?;
        register(&registry, "operations_in_flight", &operations_in_flight)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                helper_stages_total,
                operations_total,
                channel_connects_total,
                channel_disconnects_total,
                decode_failures_total,
                destination_waits_total,
                operations_in_flight,
            }),
        })
    }

    /// Count a dispatcher stage transition.
    pub fn inc_helper_stage(&self, stage: &str) {
        self.inner
            .helper_stages_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Count a finished operation.
    pub fn inc_operation(&self, kind: &str, outcome: &str) {
        self.inner
            .operations_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Count a connection attempt; `result` is `ok`, `error` or `timeout`.
    pub fn inc_channel_connect(&self, result: &str) {
        self.inner
            .channel_connects_total
            .with_label_values(&[result])
            .inc();
    }

    /// Count a lost channel session.
    pub fn inc_channel_disconnect(&self) {
        self.inner.channel_disconnects_total.inc();
    }

    /// Count an undecodable request frame.
    pub fn inc_decode_failure(&self) {
        self.inner.decode_failures_total.inc();
    }

    /// Count an operation that had to wait for a destination lock.
    pub fn inc_destination_wait(&self) {
        self.inner.destination_waits_total.inc();
    }

    /// Track an operation entering the dispatcher.
    pub fn operation_started(&self) {
        self.inner.operations_in_flight.inc();
    }

    /// Track an operation leaving the dispatcher.
    pub fn operation_finished(&self) {
        self.inner.operations_in_flight.dec();
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Snapshot of the scalar collectors.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_in_flight: self.inner.operations_in_flight.get(),
            channel_disconnects_total: self.inner.channel_disconnects_total.get(),
            decode_failures_total: self.inner.decode_failures_total.get(),
            destination_waits_total: self.inner.destination_waits_total.get(),
        }
    }

    /// Current value of `operations_total` for the given labels.
    #[must_use]
    pub fn operation_count(&self, kind: &str, outcome: &str) -> u64 {
        self.inner
            .operations_total
            .with_label_values(&[kind, outcome])
            .get()
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
