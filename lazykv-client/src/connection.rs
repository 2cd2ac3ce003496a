//! # Connection State Machine
//!
//! Purpose: Own the single deferred connection of a client and make sure the
//! handshake happens exactly once.
//!
//! ## States
//!
//! ```text
//! Uninitialized ──connection()──▶ Connecting ──ready──▶ Ready
//!                                     │
//!                                     └──────error────▶ Failed
//! ```
//!
//! `Ready` and `Failed` are terminal. The outcome is stored in a
//! `futures::future::Shared`, so every clone of the `DeferredConnection`
//! observes the same handle or the same error. There is no reconnect: a failed
//! client is replaced by its owner.
//!
//! ## Driving
//!
//! When created inside a Tokio runtime the attempt is spawned immediately, so
//! the handshake overlaps with whatever the caller does next. Outside a runtime
//! it starts on the first await.
//!
//! ## Replacement
//!
//! `connect` may swap an unsettled attempt for a new one. The old attempt
//! drops its handshake and resolves to whatever the new one resolves to, so
//! callers already waiting on it never open a second connection.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::options::{ConnectionOptions, OptionsSource};
use crate::store::{Connector, StoreHandle};

/// Outcome of a connection attempt, replayed to every observer.
pub type ConnectOutcome = ClientResult<Arc<dyn StoreHandle>>;

/// Lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No attempt has been started.
    Uninitialized,
    /// Options are resolving or the handshake is in flight.
    Connecting,
    /// The handle is live.
    Ready,
    /// The attempt failed; the error is cached.
    Failed,
}

impl ConnectionState {
    /// Returns true for the terminal states.
    pub fn is_settled(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for one attempt, shared with its deferred value.
struct Attempt {
    state: watch::Sender<ConnectionState>,
    options: Mutex<Option<ConnectionOptions>>,
}

/// Memoized, cloneable future of a client's connection.
///
/// Awaiting it yields the shared handle, or the error the attempt failed with.
/// Clones share one attempt; awaiting never triggers another handshake.
#[derive(Clone)]
pub struct DeferredConnection {
    outcome: Shared<BoxFuture<'static, ConnectOutcome>>,
    attempt: Arc<Attempt>,
}

impl DeferredConnection {
    /// Current state of the attempt.
    pub fn state(&self) -> ConnectionState {
        *self.attempt.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.attempt.state.subscribe()
    }

    /// Options used by the attempt, once known.
    pub fn options(&self) -> Option<ConnectionOptions> {
        self.attempt.options.lock().clone()
    }

    /// The settled outcome, without waiting.
    pub fn peek(&self) -> Option<&ConnectOutcome> {
        self.outcome.peek()
    }

    /// True when both values refer to the same attempt.
    pub fn same_attempt(&self, other: &DeferredConnection) -> bool {
        Arc::ptr_eq(&self.attempt, &other.attempt)
    }
}

impl Future for DeferredConnection {
    type Output = ConnectOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome.poll_unpin(cx)
    }
}

impl fmt::Debug for DeferredConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredConnection")
            .field("state", &self.state())
            .field("options", &self.options())
            .finish()
    }
}

struct Slot {
    deferred: DeferredConnection,
    driver: Option<JoinHandle<()>>,
    replace: Option<oneshot::Sender<DeferredConnection>>,
}

impl Slot {
    /// Builds the attempt without driving it.
    fn prepare(connector: Arc<dyn Connector>, source: OptionsSource) -> Self {
        let (known, resolve) = source.settle();
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let attempt = Arc::new(Attempt {
            state,
            options: Mutex::new(known),
        });
        let (replace, replaced) = oneshot::channel();

        let outcome = establish(connector, resolve, Arc::clone(&attempt), replaced)
            .boxed()
            .shared();

        Slot {
            deferred: DeferredConnection { outcome, attempt },
            driver: None,
            replace: Some(replace),
        }
    }

    /// Drives the attempt on the ambient runtime, if there is one.
    fn launch(mut self) -> Self {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let outcome = self.deferred.outcome.clone();
                // Observers read the result from the shared future.
                self.driver = Some(runtime.spawn(async move {
                    let _ = outcome.await;
                }));
            }
            Err(_) => debug!("no tokio runtime; connection starts on first await"),
        }
        self
    }

    /// Points everyone still waiting on this attempt at `next`.
    ///
    /// Hands `next` back when the attempt has already finished.
    fn hand_over(&mut self, next: DeferredConnection) -> Result<(), DeferredConnection> {
        match self.replace.take() {
            Some(replace) => replace.send(next),
            None => Err(next),
        }
    }

    fn abandon(self) {
        if let Some(driver) = self.driver {
            driver.abort();
        }
    }
}

async fn establish(
    connector: Arc<dyn Connector>,
    resolve: BoxFuture<'static, ClientResult<ConnectionOptions>>,
    attempt: Arc<Attempt>,
    replaced: oneshot::Receiver<DeferredConnection>,
) -> ConnectOutcome {
    let own = async {
        let options = resolve.await?;
        *attempt.options.lock() = Some(options.clone());
        debug!(%options, "connecting to store");
        connector.connect(options).await
    };

    let result = tokio::select! {
        biased;
        Ok(mut next) = replaced => {
            // The handshake in flight is dropped here; only `next` connects.
            debug!("connection attempt replaced; following the new one");
            let outcome = (&mut next).await;
            *attempt.options.lock() = next.options();
            attempt.state.send_replace(next.state());
            return outcome;
        }
        result = own => result,
    };

    match &result {
        Ok(handle) => {
            debug!(options = %handle.options(), "store connection ready");
            attempt.state.send_replace(ConnectionState::Ready);
        }
        Err(err) => {
            warn!(error = %err, "store connection failed");
            attempt.state.send_replace(ConnectionState::Failed);
        }
    }
    result
}

struct CellInner {
    source: Option<OptionsSource>,
    slot: Option<Slot>,
}

/// Holds at most one connection attempt per client.
pub(crate) struct ConnectionCell {
    connector: Arc<dyn Connector>,
    inner: Mutex<CellInner>,
}

impl ConnectionCell {
    /// Creates an uninitialized cell.
    pub(crate) fn new(connector: Arc<dyn Connector>, source: OptionsSource) -> Self {
        ConnectionCell {
            connector,
            inner: Mutex::new(CellInner {
                source: Some(source),
                slot: None,
            }),
        }
    }

    /// Returns the memoized deferred connection, starting the attempt on first
    /// call.
    pub(crate) fn connection(&self) -> DeferredConnection {
        let mut inner = self.inner.lock();
        self.install(&mut inner)
    }

    /// Replaces the options and restarts the attempt.
    ///
    /// Only valid while the current attempt has not settled.
    pub(crate) fn connect(&self, source: OptionsSource) -> ClientResult<DeferredConnection> {
        let mut inner = self.inner.lock();
        let Some(mut current) = inner.slot.take() else {
            inner.source = Some(source);
            return Ok(self.install(&mut inner));
        };
        if current.deferred.state().is_settled() {
            inner.slot = Some(current);
            return Err(ClientError::AlreadySettled);
        }

        let next = Slot::prepare(Arc::clone(&self.connector), source);
        if current.hand_over(next.deferred.clone()).is_err() {
            // Finished between the state check and the hand-over.
            inner.slot = Some(current);
            return Err(ClientError::AlreadySettled);
        }
        debug!("replacing in-flight connection attempt");
        current.abandon();

        let next = next.launch();
        let deferred = next.deferred.clone();
        inner.slot = Some(next);
        Ok(deferred)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner
            .lock()
            .slot
            .as_ref()
            .map_or(ConnectionState::Uninitialized, |slot| slot.deferred.state())
    }

    pub(crate) fn options(&self) -> Option<ConnectionOptions> {
        self.inner
            .lock()
            .slot
            .as_ref()
            .and_then(|slot| slot.deferred.options())
    }

    fn install(&self, inner: &mut CellInner) -> DeferredConnection {
        if let Some(slot) = &inner.slot {
            return slot.deferred.clone();
        }
        let source = inner.source.take().unwrap_or_default();
        let slot = Slot::prepare(Arc::clone(&self.connector), source).launch();
        let deferred = slot.deferred.clone();
        inner.slot = Some(slot);
        deferred
    }
}
