//! Persistent session to the privileged helper.
//!
//! # Design
//! - The session is opened lazily on the first submission and reused until it
//!   breaks; the next submission after a break opens a fresh one.
//! - Opening is serialised by an async mutex so concurrent submitters never
//!   race to connect.
//! - Each submission parks a `oneshot` under its correlation id. A single reader
//!   task routes responses to their waiters; when the session ends, every
//!   waiter left in the table is dropped and its submitter sees `Disconnected`.
//! - A request is re-sent on a fresh session only when the old one ended
//!   before the frame was queued; once queued it is never retried, since the
//!   helper may already have acted.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use santander_config::GatewayConfig;
use santander_ops::{
    EncodeError, ExecutionResult, OperationDescriptor, RequestEnvelope, decode_response,
    encode_request, frame_codec,
};
use santander_telemetry::Metrics;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};
use uuid::Uuid;

const OUTBOUND_QUEUE: usize = 64;
const SEND_ATTEMPTS: usize = 2;

/// Duplex byte stream to the helper.
pub trait HelperStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> HelperStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased helper stream returned by a [`Connector`].
pub type BoxedStream = Box<dyn HelperStream>;

/// Opens byte streams to the helper.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one new stream.
    async fn connect(&self) -> io::Result<BoxedStream>;
}

/// Connects to the helper's Unix socket.
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    path: PathBuf,
}

impl UnixSocketConnector {
    /// Connector for the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for UnixSocketConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

/// Failures of the channel itself, as opposed to failures of the operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The helper could not be reached.
    #[error("failed to connect to helper")]
    Connect {
        /// Underlying IO error.
        source: io::Error,
    },
    /// Connecting took longer than the configured limit.
    #[error("timed out connecting to helper")]
    ConnectTimeout {
        /// Limit that elapsed.
        timeout: Duration,
    },
    /// The session ended after the request may have been sent; its outcome is unknown.
    #[error("helper connection lost before a response arrived")]
    Disconnected {
        /// Correlation id of the affected request.
        correlation_id: Uuid,
    },
    /// Every session ended before the request could be queued; it never ran.
    #[error("helper connection closed before the request was sent")]
    NotSent {
        /// Correlation id of the affected request.
        correlation_id: Uuid,
    },
    /// The descriptor could not be serialised.
    #[error("operation could not be encoded")]
    Encode {
        /// Underlying encode error.
        source: EncodeError,
    },
}

/// Cloneable handle to the helper session.
#[derive(Clone)]
pub struct PrivilegedChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    connector: Box<dyn Connector>,
    session: AsyncMutex<Option<Arc<Session>>>,
    connect_timeout: Duration,
    metrics: Option<Metrics>,
}

impl PrivilegedChannel {
    /// Channel that opens sessions through `connector`.
    #[must_use]
    pub fn new(connector: impl Connector + 'static, connect_timeout: Duration) -> Self {
        Self::build(Box::new(connector), connect_timeout, None)
    }

    /// Channel that also records connection metrics.
    #[must_use]
    pub fn with_metrics(
        connector: impl Connector + 'static,
        connect_timeout: Duration,
        metrics: Metrics,
    ) -> Self {
        Self::build(Box::new(connector), connect_timeout, Some(metrics))
    }

    /// Channel to the Unix socket named in `config`, recording into `metrics`.
    #[must_use]
    pub fn from_config(config: &GatewayConfig, metrics: Metrics) -> Self {
        Self::with_metrics(
            UnixSocketConnector::new(&config.socket_path),
            config.connect_timeout,
            metrics,
        )
    }

    fn build(
        connector: Box<dyn Connector>,
        connect_timeout: Duration,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                session: AsyncMutex::new(None),
                connect_timeout,
                metrics,
            }),
        }
    }

    /// Send `descriptor` to the helper and wait for its single result.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] when the result cannot be obtained. After
    /// [`ChannelError::Disconnected`] the operation may or may not have run;
    /// after [`ChannelError::NotSent`] it did not.
    pub async fn submit(
        &self,
        descriptor: OperationDescriptor,
    ) -> Result<ExecutionResult, ChannelError> {
        let request = RequestEnvelope::new(descriptor);
        let correlation_id = request.correlation_id;
        let frame = encode_request(&request)
            .map(Bytes::from)
            .map_err(|source| ChannelError::Encode { source })?;

        for attempt in 1..=SEND_ATTEMPTS {
            let session = self.session().await?;
            if let Some(waiter) = session.enqueue(correlation_id, frame.clone()).await {
                debug!(%correlation_id, kind = request.operation.kind().as_str(), "request sent");
                return waiter
                    .await
                    .map_err(|_| ChannelError::Disconnected { correlation_id });
            }
            debug!(%correlation_id, attempt, "session ended before the request was queued");
        }
        Err(ChannelError::NotSent { correlation_id })
    }

    /// Whether a live session is currently open.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.pending.is_open())
    }

    async fn session(&self) -> Result<Arc<Session>, ChannelError> {
        let mut slot = self.inner.session.lock().await;
        if let Some(session) = slot.as_ref()
            && session.pending.is_open()
        {
            return Ok(Arc::clone(session));
        }

        let connected =
            tokio::time::timeout(self.inner.connect_timeout, self.inner.connector.connect()).await;
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.record_connect("error");
                warn!(error = %source, "failed to connect to helper");
                return Err(ChannelError::Connect { source });
            }
            Err(_) => {
                self.record_connect("timeout");
                warn!(timeout = ?self.inner.connect_timeout, "helper connect timed out");
                return Err(ChannelError::ConnectTimeout {
                    timeout: self.inner.connect_timeout,
                });
            }
        };
        self.record_connect("success");
        debug!("helper session opened");

        let session = Arc::new(Session::open(stream, self.inner.metrics.clone()));
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    fn record_connect(&self, result: &str) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.inc_channel_connect(result);
        }
    }
}

struct Session {
    outbound: mpsc::Sender<Bytes>,
    pending: Arc<PendingTable>,
}

impl Session {
    fn open(stream: BoxedStream, metrics: Option<Metrics>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, frame_codec());
        let mut sink = FramedWrite::new(write_half, frame_codec());
        let (outbound, mut queue) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
        let pending = Arc::new(PendingTable::default());

        let writer_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "failed to write request frame");
                    writer_pending.close();
                    return;
                }
            }
            // Every handle to the session is gone; let the helper see EOF.
            if let Err(err) = SinkExt::<Bytes>::close(&mut sink).await {
                debug!(error = %err, "failed to shut down helper stream");
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "failed to read response frame");
                        break;
                    }
                };
                match decode_response(&frame) {
                    Ok(response) => {
                        if !reader_pending.complete(response.correlation_id, response.outcome) {
                            warn!(
                                correlation_id = %response.correlation_id,
                                "response for unknown request"
                            );
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "undecodable response; closing helper session");
                        break;
                    }
                }
            }
            let abandoned = reader_pending.close();
            if let Some(metrics) = metrics {
                metrics.inc_channel_disconnect();
            }
            debug!(abandoned, "helper session closed");
        });

        Self { outbound, pending }
    }

    /// Park a waiter and hand `frame` to the writer. `None` means the session
    /// ended first and the frame never left the gateway.
    async fn enqueue(
        &self,
        correlation_id: Uuid,
        frame: Bytes,
    ) -> Option<oneshot::Receiver<ExecutionResult>> {
        let waiter = self.pending.register(correlation_id)?;
        if self.outbound.send(frame).await.is_err() {
            self.pending.forget(correlation_id);
            // The writer is gone; make sure the next submission reconnects.
            self.pending.close();
            return None;
        }
        Some(waiter)
    }
}

#[derive(Default)]
struct PendingTable {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    closed: bool,
    waiters: HashMap<Uuid, oneshot::Sender<ExecutionResult>>,
}

impl PendingTable {
    fn register(&self, correlation_id: Uuid) -> Option<oneshot::Receiver<ExecutionResult>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        state.waiters.insert(correlation_id, sender);
        Some(receiver)
    }

    fn complete(&self, correlation_id: Uuid, outcome: ExecutionResult) -> bool {
        let waiter = self.lock().waiters.remove(&correlation_id);
        waiter.is_some_and(|sender| {
            // The submitter may have gone away; the result is simply dropped then.
            let _ = sender.send(outcome);
            true
        })
    }

    fn forget(&self, correlation_id: Uuid) {
        self.lock().waiters.remove(&correlation_id);
    }

    /// Mark the table closed and drop every waiter, returning how many there were.
    fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let abandoned = state.waiters.len();
        state.waiters.clear();
        abandoned
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
