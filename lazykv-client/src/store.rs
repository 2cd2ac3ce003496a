//! # Store Collaborator Seam
//!
//! Purpose: Describe what the wrapper needs from the underlying store client
//! library, so the connection state machine, dispatcher and subscription
//! adapter stay independent of any particular transport.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` creates handles; `TcpConnector` is the
//!    default, tests plug in fakes.
//! 2. **Completion Callbacks**: `StoreHandle::invoke` takes a one-shot
//!    completion, mirroring callback-style store libraries. The dispatcher
//!    turns it into a future.
//! 3. **Filter Before Buffering**: Each listener owns a queue that only ever
//!    receives its channel, so traffic elsewhere can neither fill it nor
//!    push its own messages out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ClientError, ClientResult};
use crate::options::ConnectionOptions;
use crate::reply::Reply;

/// One-shot completion invoked with the outcome of a single operation.
pub type Completion = Box<dyn FnOnce(ClientResult<Reply>) + Send + 'static>;

/// Receiving half of one listener: payloads of its channel, then the reason
/// the transport ended as a final `Err`.
pub type Listener = mpsc::UnboundedReceiver<ClientResult<Bytes>>;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Message body.
    pub payload: Bytes,
}

/// A single in-flight operation: its name, arguments and completion.
pub struct PendingCall {
    /// Operation name as the caller spelled it.
    pub operation: String,
    /// Arguments, in order.
    pub args: Vec<Bytes>,
    done: Completion,
}

impl PendingCall {
    /// Creates a pending call.
    pub fn new(operation: impl Into<String>, args: Vec<Bytes>, done: Completion) -> Self {
        PendingCall {
            operation: operation.into(),
            args,
            done,
        }
    }

    /// Settles the call. Consumes it, so a call settles at most once.
    pub fn complete(self, result: ClientResult<Reply>) {
        (self.done)(result);
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("operation", &self.operation)
            .field("args", &self.args.len())
            .finish_non_exhaustive()
    }
}

/// A live, connected session with the store.
pub trait StoreHandle: Send + Sync + 'static {
    /// Options the handle was connected with.
    fn options(&self) -> &ConnectionOptions;

    /// Submits an operation. The completion must be called exactly once,
    /// including when the operation is not supported.
    fn invoke(&self, call: PendingCall);

    /// Subscribes the handle to a channel.
    fn subscribe(&self, channel: &str, done: Completion) {
        let args = vec![Bytes::copy_from_slice(channel.as_bytes())];
        self.invoke(PendingCall::new("SUBSCRIBE", args, done));
    }

    /// Registers a listener for messages on `channel`.
    ///
    /// Only messages arriving after registration are delivered. When the
    /// handle's transport ends the listener receives the reason, then closes.
    fn listen(&self, channel: &str) -> Listener;
}

/// Per-channel listener registry for `StoreHandle` implementations.
#[derive(Default)]
pub struct Listeners {
    channels: HashMap<String, Vec<mpsc::UnboundedSender<ClientResult<Bytes>>>>,
    closed: Option<ClientError>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for `channel`. After `close` the listener only
    /// receives the close reason.
    pub fn register(&mut self, channel: &str) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        match &self.closed {
            Some(reason) => {
                let _ = tx.send(Err(reason.clone()));
            }
            None => self.channels.entry(channel.to_string()).or_default().push(tx),
        }
        rx
    }

    /// Queues `message` for the listeners of its channel and returns how many
    /// took it. Dropped listeners are pruned.
    pub fn deliver(&mut self, message: PubSubMessage) -> usize {
        let Some(senders) = self.channels.get_mut(&message.channel) else {
            return 0;
        };
        senders.retain(|tx| tx.send(Ok(message.payload.clone())).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            self.channels.remove(&message.channel);
        }
        delivered
    }

    /// Hands `reason` to every listener and closes them all.
    pub fn close(&mut self, reason: ClientError) {
        for (_, senders) in self.channels.drain() {
            for tx in senders {
                let _ = tx.send(Err(reason.clone()));
            }
        }
        self.closed = Some(reason);
    }

    /// Number of live listeners on `channel`.
    pub fn count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("channels", &self.channels.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Creates store handles. `connect` resolving is the "ready" signal; an error
/// is the "error" signal.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Performs the handshake and returns a ready handle.
    async fn connect(&self, options: ConnectionOptions) -> ClientResult<Arc<dyn StoreHandle>>;
}

/// Returns true when `name` looks like a store command token.
///
/// Accepts ASCII letters, digits and the separators used by module commands
/// (`JSON.SET`, `CLIENT|LIST`).
pub fn is_operation_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'|'))
}
