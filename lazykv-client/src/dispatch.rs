//! # Command Dispatcher
//!
//! Purpose: Forward any store operation, named at runtime, to the connected
//! handle and hand the result back as a future.
//!
//! ## Flow
//! 1. Await the client's `DeferredConnection`; a failed connection fails the
//!    call with the cached error.
//! 2. Submit a `PendingCall` whose completion is the sending half of a
//!    `oneshot` channel.
//! 3. Await the receiving half. Each call settles exactly once.
//!
//! Nothing is cached and nothing is reordered: a call is submitted when its
//! future is first polled after the connection is ready.

use std::collections::HashMap;
use std::future::IntoFuture;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tracing::trace;

use crate::client::Client;
use crate::connection::DeferredConnection;
use crate::error::{ClientError, ClientResult};
use crate::reply::{FromReply, Reply, ToArg};
use crate::store::{PendingCall, StoreHandle};

/// A store operation bound to a name, awaiting its arguments.
///
/// Built by [`Client::command`]; awaiting it performs the call.
#[must_use = "a command does nothing until awaited"]
#[derive(Debug)]
pub struct Command {
    connection: DeferredConnection,
    operation: String,
    args: Vec<Bytes>,
}

impl Command {
    pub(crate) fn new(connection: DeferredConnection, operation: impl Into<String>) -> Self {
        Command {
            connection,
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends several arguments.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|arg| arg.to_arg()));
        self
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Performs the call and returns the raw reply.
    pub fn invoke(self) -> BoxFuture<'static, ClientResult<Reply>> {
        let Command {
            connection,
            operation,
            args,
        } = self;
        async move {
            let handle = connection.await?;
            dispatch(handle.as_ref(), operation, args).await
        }
        .boxed()
    }

    /// Performs the call and converts the reply.
    pub fn query<T>(self) -> BoxFuture<'static, ClientResult<T>>
    where
        T: FromReply + Send + 'static,
    {
        let call = self.invoke();
        async move { T::from_reply(call.await?) }.boxed()
    }
}

impl IntoFuture for Command {
    type Output = ClientResult<Reply>;
    type IntoFuture = BoxFuture<'static, ClientResult<Reply>>;

    fn into_future(self) -> Self::IntoFuture {
        self.invoke()
    }
}

/// Submits one operation to a ready handle and waits for its completion.
pub async fn dispatch(
    handle: &dyn StoreHandle,
    operation: String,
    args: Vec<Bytes>,
) -> ClientResult<Reply> {
    trace!(%operation, args = args.len(), "dispatching");
    let (tx, rx) = oneshot::channel();
    handle.invoke(PendingCall::new(
        operation,
        args,
        Box::new(move |result| {
            // The caller may have dropped its future; nobody is left to tell.
            let _ = tx.send(result);
        }),
    ));
    // A dropped completion means the handle went away mid-call.
    rx.await.map_err(|_| ClientError::ConnectionClosed)?
}

/// Typed wrappers for common commands. Anything else goes through
/// [`Client::command`] or [`Client::execute`].
impl Client {
    /// `PING`
    pub fn ping(&self) -> BoxFuture<'static, ClientResult<String>> {
        self.command("PING").query()
    }

    /// `GET key`; `None` when the key is missing.
    pub fn get(&self, key: impl ToArg) -> BoxFuture<'static, ClientResult<Option<String>>> {
        self.command("GET").arg(key).query()
    }

    /// `SET key value`; resolves to the status reply (`"OK"`).
    pub fn set(&self, key: impl ToArg, value: impl ToArg) -> BoxFuture<'static, ClientResult<String>> {
        self.command("SET").arg(key).arg(value).query()
    }

    /// `DEL key`; number of keys removed.
    pub fn del(&self, key: impl ToArg) -> BoxFuture<'static, ClientResult<i64>> {
        self.command("DEL").arg(key).query()
    }

    /// `EXISTS key`
    pub fn exists(&self, key: impl ToArg) -> BoxFuture<'static, ClientResult<bool>> {
        self.command("EXISTS").arg(key).query()
    }

    /// `HSET key field value`; number of fields added.
    pub fn hset(
        &self,
        key: impl ToArg,
        field: impl ToArg,
        value: impl ToArg,
    ) -> BoxFuture<'static, ClientResult<i64>> {
        self.command("HSET").arg(key).arg(field).arg(value).query()
    }

    /// `HGET key field`
    pub fn hget(
        &self,
        key: impl ToArg,
        field: impl ToArg,
    ) -> BoxFuture<'static, ClientResult<Option<String>>> {
        self.command("HGET").arg(key).arg(field).query()
    }

    /// `HKEYS key`
    pub fn hkeys(&self, key: impl ToArg) -> BoxFuture<'static, ClientResult<Vec<String>>> {
        self.command("HKEYS").arg(key).query()
    }

    /// `HGETALL key` as a field/value map.
    pub fn hgetall(
        &self,
        key: impl ToArg,
    ) -> BoxFuture<'static, ClientResult<HashMap<String, String>>> {
        self.command("HGETALL").arg(key).query()
    }

    /// `PUBLISH channel message`; number of receivers.
    pub fn publish(
        &self,
        channel: impl ToArg,
        message: impl ToArg,
    ) -> BoxFuture<'static, ClientResult<i64>> {
        self.command("PUBLISH").arg(channel).arg(message).query()
    }
}
