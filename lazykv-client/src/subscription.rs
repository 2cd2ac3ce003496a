//! # Subscription Adapter
//!
//! Purpose: Turn a channel subscription into a `Stream` of message payloads.
//!
//! ## Design Principles
//! 1. **Lazy**: Nothing happens until the stream is first polled; then the
//!    connection is awaited, a listener is registered and `SUBSCRIBE` is sent.
//! 2. **Push-Driven**: Payloads are produced when messages arrive on the
//!    handle; the consumer pulls them from the listener's own queue.
//! 3. **Independent Listeners**: Each stream owns a queue fed only with its
//!    channel, so several listeners share one connection without affecting
//!    each other.
//!
//! The stream never ends quietly: a failed subscribe or a lost transport is
//! yielded as its last item. Dropping a `Subscription` stops delivery to that
//! consumer only; the connection stays subscribed until it is torn down.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::try_stream;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream};
use tokio::sync::oneshot;
use tracing::debug;

use crate::connection::DeferredConnection;
use crate::error::{ClientError, ClientResult};
use crate::reply::Reply;

/// Stream of payloads published on one channel.
///
/// Yields `Err` as its final item when the subscribe request fails or the
/// connection is lost.
#[must_use = "streams do nothing unless polled"]
pub struct Subscription {
    channel: String,
    inner: BoxStream<'static, ClientResult<Bytes>>,
}

enum Event {
    Subscribed(Result<ClientResult<Reply>, oneshot::error::RecvError>),
    Message(Option<ClientResult<Bytes>>),
}

impl Subscription {
    pub(crate) fn new(connection: DeferredConnection, channel: String) -> Self {
        let inner = Box::pin(payloads(connection, channel.clone()));
        Subscription { channel, inner }
    }

    /// Channel this stream listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

fn payloads(
    connection: DeferredConnection,
    wanted: String,
) -> impl Stream<Item = ClientResult<Bytes>> + Send + 'static {
    try_stream! {
        let handle = connection.await?;
        // Register before subscribing so no early message is missed.
        let mut messages = handle.listen(&wanted);
        let (ack_tx, mut ack_rx) = oneshot::channel();
        debug!(channel = %wanted, "subscribing");
        handle.subscribe(&wanted, Box::new(move |result| {
            let _ = ack_tx.send(result);
        }));

        let mut acknowledged = false;
        loop {
            let event = tokio::select! {
                ack = &mut ack_rx, if !acknowledged => Event::Subscribed(ack),
                message = messages.recv() => Event::Message(message),
            };

            match event {
                Event::Subscribed(ack) => {
                    acknowledged = true;
                    match ack {
                        Ok(Ok(_)) => debug!(channel = %wanted, "subscribed"),
                        Ok(Err(err)) => Err::<(), _>(err)?,
                        Err(_) => Err::<(), _>(ClientError::ConnectionClosed)?,
                    }
                }
                Event::Message(Some(Ok(payload))) => {
                    yield payload;
                }
                Event::Message(Some(Err(err))) => {
                    debug!(channel = %wanted, error = %err, "subscription ended");
                    Err::<(), _>(err)?;
                }
                // Listener dropped without a reason; still a lost connection.
                Event::Message(None) => Err::<(), _>(ClientError::ConnectionClosed)?,
            }
        }
    }
}

impl Stream for Subscription {
    type Item = ClientResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
