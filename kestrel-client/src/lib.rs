//! # Kestrel Client
//!
//! Small synchronous client for the Kestrel wire protocol. One connection,
//! reusable buffers, and typed helpers for the full command set; the server
//! crate drives its integration tests through it.

mod client;

pub use client::{Client, ClientError, ClientResult, TtlReply};
