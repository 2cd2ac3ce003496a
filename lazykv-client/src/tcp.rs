//! # TCP Connector
//!
//! Purpose: Default store collaborator. Opens one RESP2 connection per handle
//! and multiplexes command replies and channel messages over it.
//!
//! ## Design Principles
//! 1. **Single Writer**: Frames go through one writer task, so submission order
//!    is call order.
//! 2. **FIFO Replies**: A reply completes the oldest pending call; RESP2
//!    answers in request order.
//! 3. **Push Routing**: Once the connection subscribed, `message` arrays go to
//!    the listeners of their channel instead of completing a call.
//! 4. **Fail Pending on Close**: When the transport ends, every queued call
//!    and every listener receives the reason.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lazykv_common::{RespCodec, RespValue};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::options::{ConnectionOptions, DEFAULT_DB};
use crate::reply::Reply;
use crate::store::{
    is_operation_name, Connector, Listener, Listeners, PendingCall, PubSubMessage, StoreHandle,
};

type Transport = Framed<TcpStream, RespCodec>;

/// Connector speaking RESP2 over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Creates a connector with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the TCP handshake.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, options: ConnectionOptions) -> ClientResult<Arc<dyn StoreHandle>> {
        let stream = connect_stream(&options.address(), self.connect_timeout).await?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut transport = Framed::new(stream, RespCodec);
        if options.db != DEFAULT_DB {
            select_db(&mut transport, options.db).await?;
        }

        Ok(Arc::new(RespHandle::start(transport, options)))
    }
}

async fn connect_stream(addr: &str, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let connect = TcpStream::connect(addr);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
        })??,
        None => connect.await?,
    };
    Ok(stream)
}

async fn select_db(transport: &mut Transport, db: u32) -> ClientResult<()> {
    transport
        .send(RespValue::command("SELECT", [Bytes::from(db.to_string())]))
        .await?;
    match transport.next().await {
        Some(frame) => Reply::from_resp(frame?).map(|_| ()),
        None => Err(ClientError::ConnectionClosed),
    }
}

#[derive(Default)]
struct PendingQueue {
    calls: VecDeque<PendingCall>,
    closed: bool,
}

struct Shared {
    pending: Mutex<PendingQueue>,
    listeners: Mutex<Listeners>,
    subscribed: AtomicBool,
}

impl Shared {
    fn route(&self, frame: RespValue) {
        if self.subscribed.load(Ordering::Acquire) {
            if let Some(message) = as_message(&frame) {
                self.listeners.lock().deliver(message);
                return;
            }
        }

        let call = self.pending.lock().calls.pop_front();
        match call {
            Some(call) => {
                let result = reply_for(&call.operation, frame);
                call.complete(result);
            }
            None => warn!(?frame, "reply without a pending call"),
        }
    }

    fn close(&self, reason: ClientError) {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.calls.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(pending = drained.len(), error = %reason, "failing pending calls");
        }
        for call in drained {
            call.complete(Err(reason.clone()));
        }
        self.listeners.lock().close(reason);
    }
}

/// Live RESP2 connection.
struct RespHandle {
    options: ConnectionOptions,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<RespValue>,
    reader: JoinHandle<()>,
}

impl RespHandle {
    fn start(transport: Transport, options: ConnectionOptions) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingQueue::default()),
            listeners: Mutex::new(Listeners::new()),
            subscribed: AtomicBool::new(false),
        });

        let (sink, stream) = transport.split();
        let (outbound, queued) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(sink, queued, Arc::clone(&shared)));
        let reader = tokio::spawn(read_frames(stream, Arc::clone(&shared)));

        RespHandle {
            options,
            shared,
            outbound,
            reader,
        }
    }
}

impl StoreHandle for RespHandle {
    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn invoke(&self, call: PendingCall) {
        if !is_operation_name(&call.operation) {
            let operation = call.operation.clone();
            call.complete(Err(ClientError::UnsupportedOperation(operation)));
            return;
        }

        let name = call.operation.to_ascii_uppercase();
        if matches!(name.as_str(), "SUBSCRIBE" | "PSUBSCRIBE") {
            self.shared.subscribed.store(true, Ordering::Release);
        }
        let frame = RespValue::command(&name, call.args.iter().cloned());

        let mut pending = self.shared.pending.lock();
        // Queue and send under one lock so replies line up with submissions.
        if pending.closed || self.outbound.send(frame).is_err() {
            drop(pending);
            call.complete(Err(ClientError::ConnectionClosed));
            return;
        }
        pending.calls.push_back(call);
    }

    fn listen(&self, channel: &str) -> Listener {
        self.shared.listeners.lock().register(channel)
    }
}

impl Drop for RespHandle {
    fn drop(&mut self) {
        // The writer stops once `outbound` is dropped.
        self.reader.abort();
    }
}

async fn write_frames(
    mut sink: SplitSink<Transport, RespValue>,
    mut queued: mpsc::UnboundedReceiver<RespValue>,
    shared: Arc<Shared>,
) {
    while let Some(frame) = queued.recv().await {
        if let Err(err) = sink.send(frame).await {
            warn!(error = %err, "store write failed");
            shared.close(err.into());
            return;
        }
    }
}

async fn read_frames(mut stream: SplitStream<Transport>, shared: Arc<Shared>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(frame)) => shared.route(frame),
            Some(Err(err)) => {
                warn!(error = %err, "store read failed");
                break ClientError::from(err);
            }
            None => {
                debug!("store closed the connection");
                break ClientError::ConnectionClosed;
            }
        }
    };
    shared.close(reason);
}

fn reply_for(operation: &str, frame: RespValue) -> ClientResult<Reply> {
    match frame {
        RespValue::Error(message) if message.starts_with("ERR unknown command") => {
            Err(ClientError::UnsupportedOperation(operation.to_string()))
        }
        other => Reply::from_resp(other),
    }
}

/// Recognizes `message` and `pmessage` pushes.
fn as_message(frame: &RespValue) -> Option<PubSubMessage> {
    let RespValue::Array(items) = frame else {
        return None;
    };
    let bulk = |idx: usize| match items.get(idx) {
        Some(RespValue::Bulk(Some(data))) => Some(data.clone()),
        _ => None,
    };

    let kind = bulk(0)?;
    let (channel, payload) = match (&kind[..], items.len()) {
        (b"message", 3) => (bulk(1)?, bulk(2)?),
        (b"pmessage", 4) => (bulk(2)?, bulk(3)?),
        _ => return None,
    };
    Some(PubSubMessage {
        channel: String::from_utf8_lossy(&channel).into_owned(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_message_pushes() {
        let frame = RespValue::Array(vec![
            RespValue::bulk("message"),
            RespValue::bulk("some-channel"),
            RespValue::bulk("1 message"),
        ]);
        assert_eq!(
            as_message(&frame),
            Some(PubSubMessage {
                channel: "some-channel".to_string(),
                payload: Bytes::from_static(b"1 message"),
            })
        );

        let pattern = RespValue::Array(vec![
            RespValue::bulk("pmessage"),
            RespValue::bulk("some-*"),
            RespValue::bulk("some-channel"),
            RespValue::bulk("hi"),
        ]);
        assert_eq!(as_message(&pattern).unwrap().channel, "some-channel");
    }

    #[test]
    fn ignores_ordinary_replies() {
        let ack = RespValue::Array(vec![
            RespValue::bulk("subscribe"),
            RespValue::bulk("some-channel"),
            RespValue::Integer(1),
        ]);
        assert_eq!(as_message(&ack), None);
        assert_eq!(as_message(&RespValue::Simple("OK".into())), None);
    }

    #[test]
    fn unknown_command_replies_become_unsupported() {
        let err = reply_for("nope", RespValue::Error("ERR unknown command 'nope'".into()))
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedOperation(ref op) if op == "nope"));

        let err = reply_for("get", RespValue::Error("WRONGTYPE bad".into())).unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_an_io_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector::new()
            .connect_timeout(Duration::from_secs(1))
            .connect(ConnectionOptions::new("127.0.0.1", port))
            .await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
