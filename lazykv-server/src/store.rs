//! # In-Memory Store
//!
//! Purpose: Keyspace and channel broker behind the reference server.
//!
//! ## Design Principles
//! 1. **Numbered Databases**: A fixed set of keyspaces selected per
//!    connection, each behind its own lock.
//! 2. **Typed Values**: Strings and hashes share a keyspace; using a key as the
//!    other type is a `WRONGTYPE` error.
//! 3. **Fan-Out Broker**: Publishing pushes a ready-made `message` frame to
//!    every subscriber's outbox and reports how many took it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use lazykv_common::RespValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{StoreError, StoreResult};

/// Number of selectable databases.
pub const DATABASES: usize = 16;

/// Sending half of a connection's push queue.
pub type Outbox = mpsc::UnboundedSender<RespValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
}

type Keyspace = HashMap<Bytes, Value>;

/// Shared state of a running server.
pub struct Store {
    databases: Vec<Mutex<Keyspace>>,
    channels: Mutex<HashMap<Bytes, HashMap<u64, Outbox>>>,
    next_subscriber: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            databases: (0..DATABASES).map(|_| Mutex::new(HashMap::new())).collect(),
            channels: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn db(&self, db: usize) -> StoreResult<&Mutex<Keyspace>> {
        self.databases.get(db).ok_or(StoreError::DbIndex)
    }

    /// Checks that `db` names an existing database.
    pub fn check_db(&self, db: usize) -> StoreResult<()> {
        self.db(db).map(|_| ())
    }

    pub fn get(&self, db: usize, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match self.db(db)?.lock().get(key) {
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(Value::Hash(_)) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    /// Stores a string, replacing any previous value of either type.
    pub fn set(&self, db: usize, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.db(db)?.lock().insert(key, Value::Str(value));
        Ok(())
    }

    /// Removes keys and returns how many existed.
    pub fn del(&self, db: usize, keys: &[Bytes]) -> StoreResult<i64> {
        let mut space = self.db(db)?.lock();
        Ok(keys.iter().filter(|key| space.remove(*key).is_some()).count() as i64)
    }

    /// Counts existing keys; repeated keys count each time.
    pub fn exists(&self, db: usize, keys: &[Bytes]) -> StoreResult<i64> {
        let space = self.db(db)?.lock();
        Ok(keys.iter().filter(|key| space.contains_key(*key)).count() as i64)
    }

    /// Sets hash fields and returns how many were new.
    pub fn hset(&self, db: usize, key: Bytes, pairs: &[(Bytes, Bytes)]) -> StoreResult<i64> {
        let mut space = self.db(db)?.lock();
        let value = space
            .entry(key)
            .or_insert_with(|| Value::Hash(HashMap::new()));
        let Value::Hash(fields) = value else {
            return Err(StoreError::WrongType);
        };

        let mut added = 0;
        for (field, data) in pairs {
            if fields.insert(field.clone(), data.clone()).is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn hget(&self, db: usize, key: &[u8], field: &[u8]) -> StoreResult<Option<Bytes>> {
        self.with_hash(db, key, |fields| fields.get(field).cloned())
            .map(Option::flatten)
    }

    /// Field/value pairs of a hash; empty when the key is missing.
    pub fn hgetall(&self, db: usize, key: &[u8]) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.with_hash(db, key, |fields| {
            fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
        .map(Option::unwrap_or_default)
    }

    fn with_hash<T>(
        &self,
        db: usize,
        key: &[u8],
        read: impl FnOnce(&HashMap<Bytes, Bytes>) -> T,
    ) -> StoreResult<Option<T>> {
        match self.db(db)?.lock().get(key) {
            Some(Value::Hash(fields)) => Ok(Some(read(fields))),
            Some(Value::Str(_)) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    /// Allocates an id for a new connection's subscriptions.
    pub fn next_subscriber_id(&self) -> u64 {
        self.next_subscriber.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `outbox` for `channel`. Returns false if already registered.
    pub fn subscribe(&self, id: u64, channel: Bytes, outbox: &Outbox) -> bool {
        self.channels
            .lock()
            .entry(channel)
            .or_default()
            .insert(id, outbox.clone())
            .is_none()
    }

    /// Drops every registration of subscriber `id`.
    pub fn unsubscribe_all(&self, id: u64, channels: &[Bytes]) {
        let mut registry = self.channels.lock();
        for channel in channels {
            if let Some(subscribers) = registry.get_mut(channel) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    registry.remove(channel);
                }
            }
        }
    }

    /// Pushes `payload` to every subscriber of `channel`; returns the number
    /// of receivers.
    pub fn publish(&self, channel: &Bytes, payload: &Bytes) -> i64 {
        let registry = self.channels.lock();
        let Some(subscribers) = registry.get(channel) else {
            return 0;
        };

        let frame = RespValue::Array(vec![
            RespValue::bulk("message"),
            RespValue::bulk(channel.clone()),
            RespValue::bulk(payload.clone()),
        ]);
        subscribers
            .values()
            .filter(|outbox| outbox.send(frame.clone()).is_ok())
            .count() as i64
    }

    /// Subscriber count of `channel`.
    pub fn numsub(&self, channel: &[u8]) -> i64 {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |subscribers| subscribers.len() as i64)
    }
}
