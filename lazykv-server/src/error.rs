//! # Store Errors
//!
//! Command failures are rendered verbatim as RESP error replies, so the
//! messages follow the usual `ERR`/`WRONGTYPE` prefixes.

use lazykv_common::RespError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    Arity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR DB index is out of range")]
    DbIndex,
    #[error("ERR {0}")]
    Syntax(&'static str),
    /// Transport failure on a client connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed frame from a client.
    #[error(transparent)]
    Protocol(#[from] RespError),
}
