// lazykv-common - Shared wire types for LazyKV
//
// This crate defines the RESP2 value model and codec used by both the client
// wrapper and the reference store.

pub mod error;
pub mod protocol;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
