//! # Kestrel Engine
//!
//! In-memory keyspace for the Kestrel server: an incrementally-resized
//! chained hash map, a sorted-set type built from an order-statistic AVL
//! tree plus a name index, a min-heap of TTL expirations, and a small
//! worker pool that disposes of large containers off the serving path.
//!
//! The engine performs no I/O and takes the current time as an argument,
//! so every operation is synchronous, bounded, and testable with a fake
//! clock.

pub mod avl;
pub mod clock;
pub mod db;
pub mod dict;
pub mod pool;
pub mod ttl;
pub mod zset;

pub use clock::mono_us;
pub use db::{Db, TtlStatus, WrongType, LARGE_CONTAINER_SIZE};
