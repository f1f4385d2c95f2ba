//! Stream relay
//!
//! Issues an [`UpstreamCall`] and copies the upstream response back to the
//! client. Buffered forwarding is used for small JSON responses (model
//! listings); streamed forwarding writes every upstream chunk to the client as
//! soon as it arrives and stops the upstream read as soon as the client goes
//! away.

use std::fmt::Display;
use std::io;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{
    error::{transport_message, AppError, AppResult},
    proxy::{
        cancel::{CancellationBridge, RelayState},
        headers::passthrough_content_type,
        logging::RequestContext,
        request::UpstreamCall,
    },
    routes::metrics::{record_stream_end, track_active_stream},
};

/// Item type carried from the relay task to the response body
pub type BodyChunk = Result<Bytes, io::Error>;

/// The client stopped listening
#[derive(Debug, Error)]
#[error("client connection closed")]
pub struct SinkClosed;

/// Where relayed bytes go.
///
/// The production sink feeds the response body through a channel; tests use
/// in-memory sinks.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Write one chunk, waiting for room if the client is slow
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves once the client side has stopped listening
    async fn closed(&self);

    /// End the response abruptly after a mid-stream failure
    async fn fail(&mut self, error: io::Error);
}

/// Sink writing into the channel that backs a streamed response body
pub struct ChannelSink {
    sender: mpsc::Sender<BodyChunk>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<BodyChunk>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ClientSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.sender.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.sender.closed().await
    }

    async fn fail(&mut self, error: io::Error) {
        // An error item makes hyper drop the connection instead of ending the
        // chunked body cleanly, so the client sees a truncated response.
        let _ = self.sender.send(Err(error)).await;
    }
}

/// Turn the receiving half of a relay channel into a response body.
///
/// Dropping the body (client disconnect) drops the receiver, which is what
/// [`ChannelSink::closed`] observes.
pub fn channel_body(mut receiver: mpsc::Receiver<BodyChunk>) -> Body {
    Body::from_stream(async_stream::stream! {
        while let Some(item) = receiver.recv().await {
            yield item;
        }
    })
}

enum Step<T> {
    Cancelled,
    ClientGone,
    Upstream(Option<T>),
}

/// Copy upstream chunks to the client until the stream ends, the client
/// leaves, or the call is cancelled.
///
/// The bridge must already be `Streaming`. Chunks are written in arrival
/// order, one at a time. No new upstream read starts once the token is set,
/// and nothing is written after the sink reports it closed. The upstream
/// stream is dropped before returning, which releases the connection.
pub async fn relay_chunks<S, E, K>(
    upstream: S,
    sink: &mut K,
    bridge: &CancellationBridge,
    ctx: &RequestContext,
) -> RelayState
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Display,
    K: ClientSink + ?Sized,
{
    tokio::pin!(upstream);
    let mut chunks = 0usize;
    let mut bytes = 0usize;

    let outcome = loop {
        if bridge.is_cancelled() {
            break RelayState::Aborted;
        }

        let step = tokio::select! {
            biased;
            _ = bridge.cancelled() => Step::Cancelled,
            _ = sink.closed() => Step::ClientGone,
            item = upstream.next() => Step::Upstream(item),
        };

        match step {
            Step::Cancelled => break RelayState::Aborted,
            Step::ClientGone => {
                ctx.log_client_abort("response_closed");
                bridge.response_closed();
                break RelayState::Aborted;
            }
            Step::Upstream(None) => break RelayState::CompletedNormally,
            Step::Upstream(Some(Err(e))) => {
                let message = e.to_string();
                ctx.log_stream_error(&message);
                tokio::select! {
                    biased;
                    _ = bridge.cancelled() => {}
                    _ = sink.fail(io::Error::other(message)) => {}
                }
                break RelayState::Failed;
            }
            Step::Upstream(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                let len = chunk.len();

                let written = tokio::select! {
                    biased;
                    _ = bridge.cancelled() => None,
                    result = sink.write(chunk) => Some(result),
                };

                match written {
                    Some(Ok(())) => {
                        chunks += 1;
                        bytes += len;
                    }
                    Some(Err(SinkClosed)) => {
                        ctx.log_client_abort("write_failed");
                        bridge.response_closed();
                        break RelayState::Aborted;
                    }
                    None => break RelayState::Aborted,
                }
            }
        }
    };

    let state = bridge.finish(outcome);
    ctx.log_stream_ended(state, chunks, bytes);
    state
}

/// Issues upstream calls and relays their responses
#[derive(Clone)]
pub struct StreamRelay {
    client: reqwest::Client,
    channel_capacity: usize,
}

impl StreamRelay {
    pub fn new(client: reqwest::Client, channel_capacity: usize) -> Self {
        Self {
            client,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Send the call and wait for the upstream response head.
    ///
    /// Gives up with `ClientAborted` as soon as the call's token is set; the
    /// in-flight request is dropped, which closes its connection.
    pub async fn send(&self, call: UpstreamCall, ctx: &RequestContext) -> AppResult<reqwest::Response> {
        ctx.log_upstream_request(call.method.as_str(), call.body_len());

        let UpstreamCall {
            url,
            method,
            headers,
            body,
            token,
        } = call;

        if token.is_cancelled() {
            return Err(AppError::ClientAborted);
        }

        let mut request = self.client.request(method, url.as_str()).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(AppError::ClientAborted),
            result = request.send() => result.map_err(|e| {
                let message = transport_message(&e);
                ctx.log_connection_error(&message);
                AppError::UpstreamTransport(message)
            }),
        }
    }

    /// Forward a call whose response is read in full before replying.
    ///
    /// Status, content type and body are copied verbatim, whatever the
    /// upstream status is.
    pub async fn forward_buffered(
        &self,
        call: UpstreamCall,
        ctx: &RequestContext,
    ) -> AppResult<Response<Body>> {
        let upstream = self.send(call, ctx).await?;
        let status = upstream.status();
        let content_type = passthrough_content_type(upstream.headers());
        ctx.log_upstream_response(
            status.as_u16(),
            content_type.as_ref().and_then(|v| v.to_str().ok()),
        );

        let body = upstream.bytes().await.map_err(|e| {
            let message = transport_message(&e);
            ctx.log_connection_error(&message);
            AppError::UpstreamTransport(message)
        })?;

        let mut builder = Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        builder
            .body(Body::from(body))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
    }

    /// Forward a call whose response body is relayed as it arrives.
    ///
    /// Returns once the upstream status and content type are known; the body
    /// is fed by a spawned task running [`relay_chunks`]. Errors returned from
    /// here happen before anything was committed to the client.
    pub async fn forward_streaming(
        &self,
        call: UpstreamCall,
        bridge: &CancellationBridge,
        ctx: &RequestContext,
    ) -> AppResult<Response<Body>> {
        let mut guard = bridge.abort_guard();

        let upstream = match self.send(call, ctx).await {
            Ok(upstream) => upstream,
            Err(e) => {
                guard.disarm();
                if !matches!(e, AppError::ClientAborted) {
                    bridge.finish(RelayState::Failed);
                }
                return Err(e);
            }
        };

        if !bridge.begin_streaming() {
            guard.disarm();
            return Err(AppError::ClientAborted);
        }

        let status = upstream.status();
        let content_type = passthrough_content_type(upstream.headers());
        ctx.log_upstream_response(
            status.as_u16(),
            content_type.as_ref().and_then(|v| v.to_str().ok()),
        );

        let (sender, receiver) = mpsc::channel(self.channel_capacity);

        let mut builder = Response::builder()
            .status(status)
            .header(header::CACHE_CONTROL, "no-cache")
            .header("X-Accel-Buffering", "no");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let response = match builder.body(channel_body(receiver)) {
            Ok(response) => response,
            Err(e) => {
                guard.disarm();
                bridge.finish(RelayState::Failed);
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Failed to build response: {}",
                    e
                )));
            }
        };

        let relay_bridge = bridge.clone();
        let relay_ctx = ctx.clone();
        let span = ctx.create_span();
        tokio::spawn(
            async move {
                let _active = track_active_stream();
                let mut sink = ChannelSink::new(sender);
                let state =
                    relay_chunks(upstream.bytes_stream(), &mut sink, &relay_bridge, &relay_ctx)
                        .await;
                record_stream_end(state, relay_ctx.elapsed_secs());
            }
            .instrument(span),
        );

        guard.disarm();
        Ok(response)
    }
}
