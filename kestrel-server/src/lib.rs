//! # Kestrel Server
//!
//! TCP front end for the Kestrel keyspace: connection handling, command
//! dispatch, and the housekeeping task that evicts idle connections and
//! expired keys.

pub mod dispatch;
pub mod idle;
pub mod server;

pub use server::{Server, ServerConfig, DEFAULT_PORT};
