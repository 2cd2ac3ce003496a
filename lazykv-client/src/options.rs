//! # Connection Options
//!
//! Purpose: Resolve where the wrapper connects before the first handshake.
//!
//! ## Resolution Order
//! 1. An explicit `ConnectionOptions` value (or a pending computation of one).
//! 2. Environment variables `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`.
//! 3. Literal defaults `127.0.0.1`, `6379`, `0`.
//!
//! The environment is read once, when the client is constructed, and never
//! again for that client.

use std::fmt;
use std::future::Future;

use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Default store host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default store port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default logical database.
pub const DEFAULT_DB: u32 = 0;

/// Environment variable overriding the host.
pub const HOST_VAR: &str = "REDIS_HOST";
/// Environment variable overriding the port.
pub const PORT_VAR: &str = "REDIS_PORT";
/// Environment variable overriding the database index.
pub const DB_VAR: &str = "REDIS_DB";

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Store host name or IP.
    #[serde(default = "default_host")]
    pub host: String,
    /// Store TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical database selected after connecting.
    #[serde(default)]
    pub db: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            host: default_host(),
            port: DEFAULT_PORT,
            db: DEFAULT_DB,
        }
    }
}

impl ConnectionOptions {
    /// Creates options for a host and port on database 0.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionOptions {
            host: host.into(),
            port,
            db: DEFAULT_DB,
        }
    }

    /// Sets the logical database.
    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    /// Builds options from the process environment, falling back to defaults.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds options from an arbitrary variable lookup.
    ///
    /// Empty values count as unset. Values that are present but unparsable
    /// are reported instead of being silently replaced by defaults.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut options = ConnectionOptions::default();
        if let Some(host) = read(HOST_VAR) {
            options.host = host.trim().to_string();
        }
        if let Some(port) = read(PORT_VAR) {
            options.port = parse_var(PORT_VAR, &port)?;
        }
        if let Some(db) = read(DB_VAR) {
            options.db = parse_var(DB_VAR, &db)?;
        }
        Ok(options)
    }

    /// Returns the `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.db)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> ClientResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::InvalidOptions(format!("{name}={raw:?} is not a valid number")))
}

/// Where a client gets its connection options from.
pub enum OptionsSource {
    /// Environment variables, then literal defaults.
    Environment,
    /// A concrete value.
    Explicit(ConnectionOptions),
    /// A computation that yields options later.
    Pending(BoxFuture<'static, ClientResult<ConnectionOptions>>),
}

impl OptionsSource {
    /// Wraps a future producing options.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = ClientResult<ConnectionOptions>> + Send + 'static,
    {
        OptionsSource::Pending(fut.boxed())
    }

    /// Resolves the source to concrete options.
    pub async fn resolve(self) -> ClientResult<ConnectionOptions> {
        self.settle().1.await
    }

    /// Splits the source into the options known right now (if any) and a
    /// future yielding the final outcome. The environment is read here.
    pub(crate) fn settle(
        self,
    ) -> (
        Option<ConnectionOptions>,
        BoxFuture<'static, ClientResult<ConnectionOptions>>,
    ) {
        match self {
            OptionsSource::Environment => match ConnectionOptions::from_env() {
                Ok(options) => (Some(options.clone()), future::ready(Ok(options)).boxed()),
                Err(err) => (None, future::ready(Err(err)).boxed()),
            },
            OptionsSource::Explicit(options) => {
                (Some(options.clone()), future::ready(Ok(options)).boxed())
            }
            OptionsSource::Pending(fut) => (None, fut),
        }
    }
}

impl Default for OptionsSource {
    fn default() -> Self {
        OptionsSource::Environment
    }
}

impl From<ConnectionOptions> for OptionsSource {
    fn from(options: ConnectionOptions) -> Self {
        OptionsSource::Explicit(options)
    }
}

impl From<Option<ConnectionOptions>> for OptionsSource {
    fn from(options: Option<ConnectionOptions>) -> Self {
        match options {
            Some(options) => OptionsSource::Explicit(options),
            None => OptionsSource::Environment,
        }
    }
}

impl fmt::Debug for OptionsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsSource::Environment => f.write_str("Environment"),
            OptionsSource::Explicit(options) => f.debug_tuple("Explicit").field(options).finish(),
            OptionsSource::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}
