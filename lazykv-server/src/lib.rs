//! # LazyKV Reference Store
//!
//! Purpose: A small in-memory Redis-compatible server. Enough of the command
//! set (strings, hashes, pub/sub, numbered databases) to run the client
//! against a real socket.
//!
//! ## Design Principles
//! 1. **Task per Connection**: Each client gets its own Tokio task and session.
//! 2. **Lenient Pub/Sub**: Subscribed connections keep answering commands.
//! 3. **Errors as Replies**: Command failures become RESP error frames; only
//!    transport failures end a connection.

pub mod error;
pub mod server;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use server::{handle_connection, serve, spawn, BIND_VAR, DEFAULT_BIND};
pub use store::{Store, DATABASES};
