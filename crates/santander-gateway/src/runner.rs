//! Caller-side concurrency wrapper.
//!
//! # Design
//! - UI work (the progress indicator, the completion) only ever runs on the
//!   [`UiContext`]; the channel round trip runs on the tokio runtime.
//! - The indicator is presented before the request leaves and dismissed
//!   before the completion is called, in one UI job, so it is never left up.
//! - The completion is consumed by value: it cannot run twice.
//! - A submission abandoned before it produced an outcome (runtime shut down,
//!   task dropped) still completes, with [`GatewayError::Internal`]. A UI job
//!   the context drops without running delivers inline instead of never.

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use futures_util::FutureExt;
use santander_ops::OperationDescriptor;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::PrivilegedChannel;
use crate::error::{GatewayError, OperationOutput, into_output};

/// Unit of work scheduled on the UI context.
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

type Completion = Box<dyn FnOnce(Result<OperationOutput, GatewayError>) + Send + 'static>;

/// Serial execution context that owns user-facing state.
pub trait UiContext: Send + Sync {
    /// Schedule `job`; jobs run one at a time in submission order.
    fn dispatch(&self, job: UiJob);

    /// Whether the calling thread is the context's own.
    fn is_current(&self) -> bool;
}

/// Progress overlay shown while an operation is outstanding.
pub trait ProgressIndicator: Send + Sync {
    /// Show the indicator with `title`.
    fn present(&self, title: &str);

    /// Hide the indicator.
    fn dismiss(&self);
}

/// Dedicated thread draining UI jobs in order.
///
/// The thread exits once the queue and every clone of its sender are dropped.
pub struct MainQueue {
    jobs: mpsc::Sender<UiJob>,
    thread: ThreadId,
}

impl MainQueue {
    /// Start the queue thread under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<UiJob>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in queue {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        warn!(detail = %panic_message(payload.as_ref()), "ui job panicked");
                    }
                }
            })?;
        Ok(Self {
            jobs,
            thread: worker.thread().id(),
        })
    }
}

impl UiContext for MainQueue {
    fn dispatch(&self, job: UiJob) {
        if self.jobs.send(job).is_err() {
            warn!("ui queue has stopped; job dropped");
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }
}

/// Submits descriptors on behalf of UI code.
#[derive(Clone)]
pub struct OperationRunner {
    channel: PrivilegedChannel,
    runtime: Handle,
    ui: Arc<dyn UiContext>,
    indicator: Arc<dyn ProgressIndicator>,
}

impl OperationRunner {
    /// Runner that performs round trips on `runtime` and reports on `ui`.
    #[must_use]
    pub fn new(
        channel: PrivilegedChannel,
        runtime: Handle,
        ui: Arc<dyn UiContext>,
        indicator: Arc<dyn ProgressIndicator>,
    ) -> Self {
        Self {
            channel,
            runtime,
            ui,
            indicator,
        }
    }

    /// Present the progress indicator, run `descriptor` through the helper
    /// and, on the UI context, dismiss the indicator and call `completion`
    /// exactly once with the outcome.
    pub fn submit_privileged_operation<F>(&self, descriptor: OperationDescriptor, completion: F)
    where
        F: FnOnce(Result<OperationOutput, GatewayError>) + Send + 'static,
    {
        let title = descriptor.kind().progress_title();
        let indicator = Arc::clone(&self.indicator);
        self.on_ui(move || indicator.present(title));

        let channel = self.channel.clone();
        let delivery = Delivery {
            completion: Some(Box::new(completion)),
            indicator: Arc::clone(&self.indicator),
            ui: Arc::clone(&self.ui),
        };
        self.runtime.spawn(async move {
            let outcome = run_guarded(channel, descriptor).await;
            delivery.deliver(outcome);
        });
    }

    /// Run `descriptor` without touching the UI, yielding the outcome as a future.
    pub fn submit(&self, descriptor: OperationDescriptor) -> OperationTask {
        OperationTask {
            handle: self
                .runtime
                .spawn(run_guarded(self.channel.clone(), descriptor)),
        }
    }

    fn on_ui(&self, job: impl FnOnce() + Send + 'static) {
        if self.ui.is_current() {
            job();
        } else {
            self.ui.dispatch(Box::new(job));
        }
    }
}

/// Owns a submission's completion until an outcome is handed to the UI.
struct Delivery {
    completion: Option<Completion>,
    indicator: Arc<dyn ProgressIndicator>,
    ui: Arc<dyn UiContext>,
}

impl Delivery {
    fn deliver(mut self, outcome: Result<OperationOutput, GatewayError>) {
        self.schedule(outcome);
    }

    fn schedule(&mut self, outcome: Result<OperationOutput, GatewayError>) {
        let Some(completion) = self.completion.take() else {
            return;
        };
        let mut finish = Finish {
            completion: Some(completion),
            outcome: Some(outcome),
            indicator: Arc::clone(&self.indicator),
        };
        self.ui.dispatch(Box::new(move || finish.fire()));
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.completion.is_some() {
            warn!("submission abandoned before the helper replied");
            self.schedule(Err(GatewayError::Internal {
                message: "submission abandoned before the helper replied".to_string(),
            }));
        }
    }
}

/// UI job that dismisses the indicator and calls the completion.
struct Finish {
    completion: Option<Completion>,
    outcome: Option<Result<OperationOutput, GatewayError>>,
    indicator: Arc<dyn ProgressIndicator>,
}

impl Finish {
    fn fire(&mut self) {
        if let (Some(completion), Some(outcome)) = (self.completion.take(), self.outcome.take()) {
            self.indicator.dismiss();
            completion(outcome);
        }
    }
}

impl Drop for Finish {
    fn drop(&mut self) {
        if self.completion.is_some() {
            warn!("ui context dropped a completion; delivering it inline");
            self.fire();
        }
    }
}

/// In-flight submission started by [`OperationRunner::submit`].
#[must_use = "the outcome is only observable by awaiting the task"]
pub struct OperationTask {
    handle: JoinHandle<Result<OperationOutput, GatewayError>>,
}

impl Future for OperationTask {
    type Output = Result<OperationOutput, GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                Err(GatewayError::Internal {
                    message: err.to_string(),
                })
            })
        })
    }
}

async fn run_guarded(
    channel: PrivilegedChannel,
    descriptor: OperationDescriptor,
) -> Result<OperationOutput, GatewayError> {
    match AssertUnwindSafe(channel.submit(descriptor))
        .catch_unwind()
        .await
    {
        Ok(submitted) => into_output(submitted),
        Err(payload) => Err(GatewayError::Internal {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BoxedStream, ChannelError, Connector};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    type TestResult<T> = anyhow::Result<T>;

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn connect(&self) -> io::Result<BoxedStream> {
            std::future::pending().await
        }
    }

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self) -> io::Result<BoxedStream> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }
    }

    /// Context that silently discards every job.
    struct DroppingContext;

    impl UiContext for DroppingContext {
        fn dispatch(&self, job: UiJob) {
            drop(job);
        }

        fn is_current(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }

        fn push(&self, call: &str) {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(call.to_string());
        }
    }

    impl ProgressIndicator for Recorder {
        fn present(&self, _title: &str) {
            self.push("present");
        }

        fn dismiss(&self) {
            self.push("dismiss");
        }
    }

    #[test]
    fn runtime_shutdown_still_completes_the_submission() -> TestResult<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let recorder = Arc::new(Recorder::default());
        let runner = OperationRunner::new(
            PrivilegedChannel::new(NeverConnects, Duration::from_secs(60)),
            runtime.handle().clone(),
            Arc::new(MainQueue::spawn("shutdown-ui")?),
            Arc::clone(&recorder) as Arc<dyn ProgressIndicator>,
        );

        let (done, delivered) = mpsc::channel();
        runner.submit_privileged_operation(
            OperationDescriptor::remove("/var/mobile/a"),
            move |outcome| {
                let _ = done.send(outcome);
            },
        );
        thread::sleep(Duration::from_millis(50));
        runtime.shutdown_timeout(Duration::from_millis(100));

        let outcome = delivered.recv_timeout(Duration::from_secs(5))?;
        assert!(matches!(outcome, Err(GatewayError::Internal { .. })));
        assert!(delivered.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(recorder.calls(), vec!["present", "dismiss"]);
        Ok(())
    }

    #[test]
    fn dropped_ui_jobs_still_deliver_the_completion() -> TestResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let recorder = Arc::new(Recorder::default());
        let runner = OperationRunner::new(
            PrivilegedChannel::new(Refusing, Duration::from_secs(5)),
            runtime.handle().clone(),
            Arc::new(DroppingContext),
            Arc::clone(&recorder) as Arc<dyn ProgressIndicator>,
        );

        let (done, delivered) = mpsc::channel();
        runner.submit_privileged_operation(
            OperationDescriptor::remove("/var/mobile/a"),
            move |outcome| {
                let _ = done.send(outcome);
            },
        );
        // A current-thread runtime only makes progress while it is driven.
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(50)).await });

        let outcome = delivered.recv_timeout(Duration::from_secs(5))?;
        assert!(matches!(
            outcome,
            Err(GatewayError::Channel {
                source: ChannelError::Connect { .. }
            })
        ));
        assert_eq!(recorder.calls(), vec!["dismiss"]);
        Ok(())
    }

    #[test]
    fn main_queue_runs_jobs_in_order_on_its_thread() -> TestResult<()> {
        let queue = MainQueue::spawn("test-ui")?;
        assert!(!queue.is_current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done, finished) = mpsc::channel();

        for step in 0..3 {
            let seen = Arc::clone(&seen);
            queue.dispatch(Box::new(move || {
                seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(step);
            }));
        }
        queue.dispatch(Box::new(|| panic!("job failure must not stop the queue")));
        queue.dispatch(Box::new(move || {
            let _ = done.send(thread::current().name().map(str::to_string));
        }));

        let name = finished.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(name.as_deref(), Some("test-ui"));
        assert_eq!(
            *seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            vec![0, 1, 2]
        );
        Ok(())
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "task panicked");
    }
}
