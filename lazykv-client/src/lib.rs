//! # LazyKV Async Client
//!
//! Purpose: Wrap a Redis-compatible store behind a client that can be used the
//! moment it is constructed, while the connection is still being set up.
//!
//! ## Design Principles
//! 1. **Deferred Connection**: One memoized attempt per client; every command
//!    waits on it and a failure is replayed to every caller.
//! 2. **Open Dispatch**: Any operation name is forwarded, so new store commands
//!    need no client changes.
//! 3. **Futures and Streams**: Completions become futures and each channel
//!    listener becomes a `Stream`.
//! 4. **Pluggable Collaborator**: `Connector` and `StoreHandle` separate the
//!    state machine from the wire; `TcpConnector` speaks RESP2.

mod client;
mod connection;
mod dispatch;
mod error;
mod options;
mod reply;
mod store;
mod subscription;
mod tcp;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use connection::{ConnectOutcome, ConnectionState, DeferredConnection};
pub use dispatch::{dispatch, Command};
pub use error::{ClientError, ClientResult};
pub use options::{
    ConnectionOptions, OptionsSource, DB_VAR, DEFAULT_DB, DEFAULT_HOST, DEFAULT_PORT, HOST_VAR,
    PORT_VAR,
};
pub use reply::{FromReply, Reply, ToArg};
pub use store::{
    is_operation_name, Completion, Connector, Listener, Listeners, PendingCall, PubSubMessage,
    StoreHandle,
};
pub use subscription::Subscription;
pub use tcp::TcpConnector;
