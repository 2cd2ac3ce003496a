//! # Wire Errors
//!
//! Failures raised while framing or parsing RESP2 traffic.

use std::sync::Arc;

use thiserror::Error;

/// Result type for codec operations.
pub type RespResult<T> = Result<T, RespError>;

/// Errors raised by the RESP2 codec.
///
/// The type is `Clone` so it can be carried inside replayable results; IO
/// errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum RespError {
    /// Transport failure while reading or writing frames.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    /// Malformed framing (bad prefix, missing CRLF, bad length).
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// A frame exceeded one of the codec limits.
    #[error("frame limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl From<std::io::Error> for RespError {
    fn from(err: std::io::Error) -> Self {
        RespError::Io(Arc::new(err))
    }
}
