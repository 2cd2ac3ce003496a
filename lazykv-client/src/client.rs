//! # Client Facade
//!
//! Purpose: The one object callers hold. It owns the lazily started
//! connection and exposes every store operation on top of it.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides option resolution, the connection
//!    state machine and completion plumbing.
//! 2. **Usable Immediately**: Construction never blocks or fails; commands
//!    issued early wait for the connection.
//! 3. **Open Command Set**: Any operation name can be sent; the typed methods
//!    are shortcuts.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::connection::{ConnectionCell, ConnectionState, DeferredConnection};
use crate::dispatch::Command;
use crate::error::{ClientError, ClientResult};
use crate::options::{ConnectionOptions, OptionsSource};
use crate::reply::{Reply, ToArg};
use crate::store::Connector;
use crate::subscription::Subscription;
use crate::tcp::TcpConnector;

/// Lazily connected store client.
///
/// ```no_run
/// # async fn demo() -> lazykv_client::ClientResult<()> {
/// let client = lazykv_client::Client::new();
/// client.set("greeting", "hello").await?;
/// assert_eq!(client.get("greeting").await?, Some("hello".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct Client {
    cell: ConnectionCell,
}

impl Client {
    /// Connects over TCP with options taken from `REDIS_HOST`, `REDIS_PORT`
    /// and `REDIS_DB`.
    pub fn new() -> Self {
        Self::with_options(OptionsSource::Environment)
    }

    /// Connects over TCP with explicit, pending or environment options.
    pub fn with_options(source: impl Into<OptionsSource>) -> Self {
        Self::with_connector(source, Arc::new(TcpConnector::default()))
    }

    /// Uses a custom collaborator to reach the store.
    pub fn with_connector(source: impl Into<OptionsSource>, connector: Arc<dyn Connector>) -> Self {
        let client = Client {
            cell: ConnectionCell::new(connector, source.into()),
        };
        // Start the attempt now; callers only ever see it through futures.
        client.cell.connection();
        client
    }

    /// Options the connection uses, once known.
    pub fn options(&self) -> Option<ConnectionOptions> {
        self.cell.options()
    }

    /// The shared connection future. Every call returns the same attempt.
    pub fn connection(&self) -> DeferredConnection {
        self.cell.connection()
    }

    /// Restarts the attempt with new options.
    ///
    /// Fails with [`ClientError::AlreadySettled`](crate::ClientError::AlreadySettled)
    /// once the current attempt has connected or failed.
    pub fn connect(&self, source: impl Into<OptionsSource>) -> ClientResult<DeferredConnection> {
        self.cell.connect(source.into())
    }

    /// Current state of the connection attempt.
    pub fn state(&self) -> ConnectionState {
        self.cell.state()
    }

    /// Watches the current attempt's state.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.cell.connection().state_changes()
    }

    /// Starts building a call to `operation`.
    pub fn command(&self, operation: impl Into<String>) -> Command {
        Command::new(self.cell.connection(), operation)
    }

    /// Sends `operation` with `args` and returns the raw reply.
    pub fn execute<I>(
        &self,
        operation: impl Into<String>,
        args: I,
    ) -> BoxFuture<'static, ClientResult<Reply>>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.command(operation).args(args).invoke()
    }

    /// Streams payloads published on `channel`.
    pub fn listen(&self, channel: impl Into<String>) -> Subscription {
        Subscription::new(self.cell.connection(), channel.into())
    }

    /// Sends a raw argument vector, first element being the operation.
    pub fn execute_raw(&self, mut argv: Vec<Bytes>) -> BoxFuture<'static, ClientResult<Reply>> {
        if argv.is_empty() {
            return Box::pin(async { Err(ClientError::UnsupportedOperation(String::new())) });
        }
        let operation = String::from_utf8_lossy(&argv.remove(0)).into_owned();
        self.command(operation).args(argv).invoke()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("options", &self.options())
            .finish()
    }
}
