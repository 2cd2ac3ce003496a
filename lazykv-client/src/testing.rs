//! In-memory collaborator used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ClientError, ClientResult};
use crate::options::ConnectionOptions;
use crate::reply::Reply;
use crate::store::{Connector, Listener, Listeners, PendingCall, PubSubMessage, StoreHandle};

pub(crate) struct FakeConnector {
    attempts: AtomicUsize,
    failure: Option<String>,
    gate: Option<watch::Sender<bool>>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FakeConnector {
            attempts: AtomicUsize::new(0),
            failure: None,
            gate: None,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Every handshake fails with an IO error carrying `message`.
    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(FakeConnector {
            attempts: AtomicUsize::new(0),
            failure: Some(message.to_string()),
            gate: None,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Handshakes block until `open_gate` is called.
    pub(crate) fn gated() -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(FakeConnector {
            attempts: AtomicUsize::new(0),
            failure: None,
            gate: Some(gate),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn last_handle(&self) -> Arc<FakeHandle> {
        self.try_last_handle().expect("no handle created")
    }

    pub(crate) fn try_last_handle(&self) -> Option<Arc<FakeHandle>> {
        self.handles.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, options: ConnectionOptions) -> ClientResult<Arc<dyn StoreHandle>> {
        if let Some(gate) = &self.gate {
            let mut open = gate.subscribe();
            if open.wait_for(|open| *open).await.is_err() {
                return Err(ClientError::ConnectionClosed);
            }
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(std::io::Error::other(message.clone()).into());
        }

        let handle = Arc::new(FakeHandle::new(options));
        self.handles.lock().push(Arc::clone(&handle));
        Ok(handle)
    }
}

pub(crate) struct FakeHandle {
    options: ConnectionOptions,
    strings: Mutex<HashMap<Bytes, Bytes>>,
    hashes: Mutex<HashMap<Bytes, HashMap<Bytes, Bytes>>>,
    calls: Mutex<Vec<String>>,
    listeners: Mutex<Listeners>,
    disconnected: Mutex<Option<ClientError>>,
}

impl FakeHandle {
    fn new(options: ConnectionOptions) -> Self {
        FakeHandle {
            options,
            strings: Mutex::new(HashMap::new()),
            hashes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(Listeners::new()),
            disconnected: Mutex::new(None),
        }
    }

    /// Operation names in submission order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Delivers a channel message; returns the number of listeners reached.
    pub(crate) fn emit(&self, channel: &str, payload: &str) -> usize {
        self.listeners.lock().deliver(PubSubMessage {
            channel: channel.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        })
    }

    /// Simulates the transport going away.
    pub(crate) fn disconnect(&self, reason: ClientError) {
        *self.disconnected.lock() = Some(reason.clone());
        self.listeners.lock().close(reason);
    }

    fn execute(&self, operation: &str, args: &[Bytes]) -> ClientResult<Reply> {
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(ClientError::Server(format!(
                    "ERR wrong number of arguments for '{operation}'"
                )))
            }
        };

        match operation.to_ascii_uppercase().as_str() {
            "PING" => Ok(Reply::Status("PONG".to_string())),
            "SET" => {
                arity(2)?;
                self.strings.lock().insert(args[0].clone(), args[1].clone());
                Ok(Reply::Status("OK".to_string()))
            }
            "GET" => {
                arity(1)?;
                Ok(self
                    .strings
                    .lock()
                    .get(&args[0])
                    .cloned()
                    .map_or(Reply::Nil, Reply::Data))
            }
            "HSET" => {
                arity(3)?;
                let mut hashes = self.hashes.lock();
                let fresh = hashes
                    .entry(args[0].clone())
                    .or_default()
                    .insert(args[1].clone(), args[2].clone())
                    .is_none();
                Ok(Reply::Integer(fresh as i64))
            }
            "HGETALL" => {
                arity(1)?;
                let hashes = self.hashes.lock();
                let items = hashes
                    .get(&args[0])
                    .into_iter()
                    .flatten()
                    .flat_map(|(f, v)| [Reply::Data(f.clone()), Reply::Data(v.clone())])
                    .collect();
                Ok(Reply::Array(items))
            }
            "PUBLISH" => {
                arity(2)?;
                let delivered = self.listeners.lock().deliver(PubSubMessage {
                    channel: String::from_utf8_lossy(&args[0]).into_owned(),
                    payload: args[1].clone(),
                });
                Ok(Reply::Integer(delivered as i64))
            }
            "SUBSCRIBE" => {
                arity(1)?;
                Ok(Reply::Array(vec![
                    Reply::Data(Bytes::from_static(b"subscribe")),
                    Reply::Data(args[0].clone()),
                    Reply::Integer(1),
                ]))
            }
            "FAIL" => Err(ClientError::Server("ERR told to fail".to_string())),
            _ => Err(ClientError::UnsupportedOperation(operation.to_string())),
        }
    }
}

impl StoreHandle for FakeHandle {
    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn invoke(&self, call: PendingCall) {
        self.calls.lock().push(call.operation.clone());
        let disconnected = self.disconnected.lock().clone();
        let result = match disconnected {
            Some(reason) => Err(reason),
            None => self.execute(&call.operation, &call.args),
        };
        call.complete(result);
    }

    fn listen(&self, channel: &str) -> Listener {
        self.listeners.lock().register(channel)
    }
}
