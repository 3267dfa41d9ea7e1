//! Connection handling for the helper socket.
//!
//! # Design
//! - One reader loop per connection decodes frames; each request is
//!   dispatched on its own task so slow operations never block the socket.
//! - Responses funnel through a single writer task, which owns the write half.
//! - A frame that fails to decode but still carries a correlation id is
//!   answered with `InvalidRequest`; anything else is logged and dropped.

use std::future::Future;
use std::pin::pin;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use santander_ops::{
    DecodeError, ErrorKind, ExecutionResult, ResponseEnvelope, decode_request, encode_response,
    frame_codec, peek_correlation_id,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;

const RESPONSE_QUEUE: usize = 64;

/// Accepts connections and feeds their requests to the [`Dispatcher`].
#[derive(Clone)]
pub struct HelperServer {
    dispatcher: Dispatcher,
}

impl HelperServer {
    /// Wrap a dispatcher.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Dispatcher shared by every connection.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Connections that are already open keep running until their peer hangs up.
    pub async fn serve_unix<F>(&self, listener: UnixListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("helper listener shutting down");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = self.clone();
                        let span = tracing::info_span!("connection", connection_id = %Uuid::new_v4());
                        tokio::spawn(async move { server.serve_connection(stream).await }.instrument(span));
                    }
                    Err(err) => warn!(error = %err, "failed to accept helper connection"),
                },
            }
        }
    }

    /// Serve one duplex byte stream until the peer closes it and every
    /// in-flight request on it has been answered.
    pub async fn serve_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, frame_codec());
        let mut sink = FramedWrite::new(write_half, frame_codec());
        let (responses, mut outbound) = mpsc::channel::<Bytes>(RESPONSE_QUEUE);

        let writer = tokio::spawn(
            async move {
                while let Some(frame) = outbound.recv().await {
                    if let Err(err) = sink.send(frame).await {
                        warn!(error = %err, "failed to write response frame");
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        debug!("connection opened");
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => self.handle_frame(&frame, &responses).await,
                Err(err) => {
                    warn!(error = %err, "failed to read request frame");
                    break;
                }
            }
        }
        drop(responses);
        if let Err(err) = writer.await {
            warn!(error = %err, "response writer terminated abnormally");
        }
        debug!("connection closed");
    }

    async fn handle_frame(&self, frame: &BytesMut, responses: &mpsc::Sender<Bytes>) {
        match decode_request(frame) {
            Ok(request) => {
                let dispatcher = self.dispatcher.clone();
                let responses = responses.clone();
                tokio::spawn(
                    async move {
                        let outcome = dispatcher
                            .dispatch(request.correlation_id, request.operation)
                            .await;
                        let envelope = ResponseEnvelope::new(request.correlation_id, outcome);
                        send_response(&responses, &envelope).await;
                    }
                    .in_current_span(),
                );
            }
            Err(err) => {
                self.dispatcher.metrics().inc_decode_failure();
                let detail = describe_decode_error(&err);
                if let Some(correlation_id) = peek_correlation_id(frame) {
                    warn!(%correlation_id, detail = %detail, "rejecting undecodable request");
                    let envelope = ResponseEnvelope::new(
                        correlation_id,
                        ExecutionResult::failure(ErrorKind::InvalidRequest, detail),
                    );
                    send_response(responses, &envelope).await;
                } else {
                    warn!(detail = %detail, "dropping undecodable frame without correlation id");
                }
            }
        }
    }
}

async fn send_response(responses: &mpsc::Sender<Bytes>, envelope: &ResponseEnvelope) {
    let frame = match encode_response(envelope) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "response could not be encoded; reporting internal failure");
            let fallback = ResponseEnvelope::new(
                envelope.correlation_id,
                ExecutionResult::failure(ErrorKind::Internal, "result could not be encoded"),
            );
            match encode_response(&fallback) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "fallback response could not be encoded");
                    return;
                }
            }
        }
    };
    if responses.send(Bytes::from(frame)).await.is_err() {
        debug!(
            correlation_id = %envelope.correlation_id,
            "connection closed before the response was sent"
        );
    }
}

fn describe_decode_error(err: &DecodeError) -> String {
    match err {
        DecodeError::Malformed { field, reason } => format!("request {field} malformed ({reason})"),
        DecodeError::InvalidField { field, source } => format!("request {field} invalid: {source}"),
        DecodeError::UnsupportedVersion { found, min, max } => {
            format!("unsupported schema version {found}; supported {min}..={max}")
        }
        DecodeError::UnknownOperation { tag } => format!("unknown operation '{tag}'"),
        DecodeError::Truncated { .. }
        | DecodeError::Syntax { .. }
        | DecodeError::MissingOperationTag => format!("request rejected: {err}"),
    }
}
