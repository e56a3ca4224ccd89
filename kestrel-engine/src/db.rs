//! # Keyspace
//!
//! The server's single database: a dict of entries, the TTL heap that
//! schedules their expiration, and the worker pool that disposes of large
//! sorted sets off the serving path.
//!
//! ## Structure Overview
//!
//! ```text
//! Db
//!   ├── dict: Dict<Entry>        key -> Entry, incremental resize
//!   ├── ttl: TtlHeap             expiry -> dict node id
//!   └── pool: WorkerPool         disposal of oversized containers
//!         Entry { key, payload: Str | Sorted, heap_slot }
//! ```
//!
//! Every operation takes the current monotonic time as an argument; the
//! keyspace itself never reads a clock, which keeps expiry behavior exact
//! under test.

use thiserror::Error;

use crate::dict::Dict;
use crate::pool::WorkerPool;
use crate::ttl::{HeapItem, TtlHeap};
use crate::zset::ZSet;

/// Sorted sets larger than this are dropped on the worker pool so a single
/// delete or expiration cannot stall the serving thread.
pub const LARGE_CONTAINER_SIZE: usize = 10_000;

/// A command touched a key holding the other value type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("value has the wrong type")]
pub struct WrongType;

/// TTL state of a key, mirroring PTTL semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Key does not exist.
    Missing,
    /// Key exists and never expires.
    NoExpiry,
    /// Key expires in this many milliseconds (0 when already due).
    RemainingMs(u64),
}

enum Payload {
    Str(Vec<u8>),
    Sorted(Box<ZSet>),
}

struct Entry {
    key: Box<[u8]>,
    payload: Payload,
    /// Position of this entry's item in the TTL heap, kept exact by the
    /// heap's movement callbacks. None when the key has no TTL.
    heap_slot: Option<usize>,
}

/// In-memory keyspace.
pub struct Db {
    dict: Dict<Entry>,
    ttl: TtlHeap,
    pool: WorkerPool,
}

impl Default for Db {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Db {
    pub fn new(disposal_threads: usize) -> Self {
        Db {
            dict: Dict::new(),
            ttl: TtlHeap::new(),
            pool: WorkerPool::new(disposal_threads),
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Visits every key, in both hash tables.
    pub fn for_each_key(&self, mut f: impl FnMut(&[u8])) {
        self.dict.for_each(|entry| f(&entry.key));
    }

    /// Returns the string value of `key`, or None when absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<&[u8]>, WrongType> {
        let Some(id) = self.find(key) else {
            return Ok(None);
        };
        match &self.dict.get(id).payload {
            Payload::Str(value) => Ok(Some(value)),
            Payload::Sorted(_) => Err(WrongType),
        }
    }

    /// Creates or replaces `key` as a string. The entry takes ownership of
    /// both buffers. An existing TTL is left in place.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), WrongType> {
        match self.find(&key) {
            Some(id) => match &mut self.dict.get_mut(id).payload {
                Payload::Str(existing) => {
                    *existing = value;
                    Ok(())
                }
                Payload::Sorted(_) => Err(WrongType),
            },
            None => {
                let hcode = self.dict.hash(&key);
                self.dict.insert(
                    hcode,
                    Entry {
                        key: key.into_boxed_slice(),
                        payload: Payload::Str(value),
                        heap_slot: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// Removes `key` of either type. Returns false when absent.
    pub fn del(&mut self, key: &[u8]) -> bool {
        match self.find(key) {
            Some(id) => {
                self.remove_entry(id);
                true
            }
            None => false,
        }
    }

    /// Sets (`ttl_ms >= 0`) or clears (`ttl_ms < 0`) the TTL of `key`.
    /// Returns false when the key is absent.
    pub fn pexpire(&mut self, key: &[u8], ttl_ms: i64, now_us: u64) -> bool {
        match self.find(key) {
            Some(id) => {
                self.set_ttl(id, ttl_ms, now_us);
                true
            }
            None => false,
        }
    }

    /// Remaining TTL of `key`.
    pub fn pttl(&mut self, key: &[u8], now_us: u64) -> TtlStatus {
        let Some(id) = self.find(key) else {
            return TtlStatus::Missing;
        };
        match self.dict.get(id).heap_slot {
            None => TtlStatus::NoExpiry,
            Some(pos) => {
                let expires_us = self.ttl.item(pos).expires_us;
                TtlStatus::RemainingMs(expires_us.saturating_sub(now_us) / 1000)
            }
        }
    }

    /// Adds a member to the sorted set at `key`, creating the set when the
    /// key is absent. Returns true when the member is new.
    pub fn zadd(&mut self, key: &[u8], score: f64, member: &[u8]) -> Result<bool, WrongType> {
        let id = match self.find(key) {
            Some(id) => id,
            None => {
                let hcode = self.dict.hash(key);
                self.dict.insert(
                    hcode,
                    Entry {
                        key: key.into(),
                        payload: Payload::Sorted(Box::new(ZSet::new())),
                        heap_slot: None,
                    },
                )
            }
        };
        match &mut self.dict.get_mut(id).payload {
            Payload::Sorted(zset) => Ok(zset.add(member, score)),
            Payload::Str(_) => Err(WrongType),
        }
    }

    /// Removes a member. Outer None when the key itself is absent.
    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> Result<Option<bool>, WrongType> {
        match self.zset_of(key)? {
            Some(zset) => Ok(Some(zset.remove(member))),
            None => Ok(None),
        }
    }

    /// Score of a member; None when the key or member is absent.
    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> Result<Option<f64>, WrongType> {
        match self.zset_of(key)? {
            Some(zset) => Ok(zset.find(member).map(|id| zset.score(id))),
            None => Ok(None),
        }
    }

    /// Range query: seeks the least member at or above `(score, member)`,
    /// skips `offset` positions, then emits (name, score) pairs while the
    /// emitted value count stays below `limit`. A missing key emits nothing.
    pub fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        member: &[u8],
        offset: i64,
        limit: i64,
        mut emit: impl FnMut(&[u8], f64),
    ) -> Result<(), WrongType> {
        let Some(zset) = self.zset_of(key)? else {
            return Ok(());
        };
        if limit <= 0 {
            return Ok(());
        }
        let mut cur = zset.query(score, member, offset);
        let mut produced: i64 = 0;
        while let Some(id) = cur {
            if produced >= limit {
                break;
            }
            emit(zset.name(id), zset.score(id));
            produced += 2;
            cur = zset.next(id);
        }
        Ok(())
    }

    /// Soonest scheduled expiration, for the timer deadline.
    pub fn next_expiry_us(&self) -> Option<u64> {
        self.ttl.peek().map(|item| item.expires_us)
    }

    /// Removes keys whose expiry has passed, at most `budget` of them, so a
    /// burst of expirations cannot monopolize a timer tick. Returns the
    /// number removed; leftovers are picked up on the next tick.
    pub fn expire_due(&mut self, now_us: u64, budget: usize) -> usize {
        let mut expired = 0;
        while expired < budget {
            let Some(root) = self.ttl.peek() else {
                break;
            };
            if root.expires_us >= now_us {
                break;
            }
            let id = root.entry;
            let Db { dict, ttl, .. } = self;
            let popped = ttl
                .pop_root(|entry, at| dict.get_mut(entry).heap_slot = Some(at))
                .expect("heap is non-empty");
            debug_assert_eq!(popped.entry, id);
            dict.get_mut(id).heap_slot = None;
            let entry = self.dict.detach(id);
            self.dispose(entry);
            expired += 1;
        }
        expired
    }

    fn find(&mut self, key: &[u8]) -> Option<usize> {
        let hcode = self.dict.hash(key);
        self.dict.find(hcode, |entry| entry.key.as_ref() == key)
    }

    fn zset_of(&mut self, key: &[u8]) -> Result<Option<&mut ZSet>, WrongType> {
        let Some(id) = self.find(key) else {
            return Ok(None);
        };
        match &mut self.dict.get_mut(id).payload {
            Payload::Sorted(zset) => Ok(Some(zset)),
            Payload::Str(_) => Err(WrongType),
        }
    }

    fn remove_entry(&mut self, id: usize) {
        self.clear_ttl(id);
        let entry = self.dict.detach(id);
        self.dispose(entry);
    }

    fn clear_ttl(&mut self, id: usize) {
        let Some(pos) = self.dict.get(id).heap_slot else {
            return;
        };
        let Db { dict, ttl, .. } = self;
        ttl.remove(pos, |entry, at| dict.get_mut(entry).heap_slot = Some(at));
        dict.get_mut(id).heap_slot = None;
    }

    fn set_ttl(&mut self, id: usize, ttl_ms: i64, now_us: u64) {
        if ttl_ms < 0 {
            self.clear_ttl(id);
            return;
        }
        let expires_us = now_us.saturating_add(ttl_ms as u64 * 1000);
        let slot = self.dict.get(id).heap_slot;
        let Db { dict, ttl, .. } = self;
        let sync = |entry: usize, at: usize| dict.get_mut(entry).heap_slot = Some(at);
        match slot {
            Some(pos) => ttl.set_expiry(pos, expires_us, sync),
            None => ttl.push(
                HeapItem {
                    expires_us,
                    entry: id,
                },
                sync,
            ),
        }
    }

    /// Frees a detached entry, handing oversized sorted sets to the pool.
    /// Ownership of the subgraph moves with the job; the keyspace never
    /// sees the value again.
    fn dispose(&self, entry: Entry) {
        if let Payload::Sorted(zset) = entry.payload {
            if zset.len() > LARGE_CONTAINER_SIZE {
                self.pool.submit(move || drop(zset));
            }
        }
    }
}
