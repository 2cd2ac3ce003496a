//! # Client Errors
//!
//! Every failure the wrapper surfaces, whether from options resolution, the
//! connect handshake, a single command, or a subscription.

use std::sync::Arc;

use lazykv_common::RespError;
use thiserror::Error;

/// Result type for the client wrapper.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client wrapper.
///
/// `Clone` is required: a failed connection settles once and the same error is
/// handed to every later observer.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    /// RESP2 framing or parse error.
    #[error(transparent)]
    Protocol(#[from] RespError),
    /// Store returned an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// The handle does not support the named operation.
    #[error("unsupported operation '{0}'")]
    UnsupportedOperation(String),
    /// Reply shape did not match what the caller asked for.
    #[error("unexpected reply: expected {expected}")]
    UnexpectedReply { expected: &'static str },
    /// Connection options could not be resolved.
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),
    /// The transport went away before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,
    /// `connect` was called after the connection had already settled.
    #[error("connection already settled; create a new client instead")]
    AlreadySettled,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl ClientError {
    /// Builds an `UnexpectedReply` error.
    pub(crate) fn unexpected(expected: &'static str) -> Self {
        ClientError::UnexpectedReply { expected }
    }
}
