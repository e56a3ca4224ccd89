//! # Idle Connection Tracker
//!
//! Doubly-linked list of live connections in least-recently-active order,
//! stored as a slab so links are plain indices. The head is always the
//! connection that has been quiet the longest, which makes the reaper's
//! "anything to close?" check O(1).
//!
//! The reaper only detaches a condemned connection and fires its kill
//! signal; the slot itself is freed by the handler task when it unwinds, so
//! a token is never reused while its connection is still alive.

use std::sync::Arc;

use tokio::sync::Notify;

/// Handle to a registered connection's slot.
#[derive(Debug, Clone, Copy)]
pub struct ConnToken(usize);

#[derive(Debug)]
struct Slot {
    idle_since_us: u64,
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
    kill: Arc<Notify>,
}

/// Slab-backed idle list.
#[derive(Debug, Default)]
pub struct IdleTracker {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    live: usize,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Adds a connection at the most-recently-active end.
    pub fn register(&mut self, now_us: u64, kill: Arc<Notify>) -> ConnToken {
        let slot = Slot {
            idle_since_us: now_us,
            prev: None,
            next: None,
            linked: false,
            kill,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.live += 1;
        self.push_back(idx);
        ConnToken(idx)
    }

    /// Refreshes a connection's activity time and moves it to the tail.
    /// A connection already condemned by the reaper stays detached.
    pub fn touch(&mut self, token: ConnToken, now_us: u64) {
        let Some(slot) = self.slots[token.0].as_mut() else {
            return;
        };
        slot.idle_since_us = now_us;
        if !slot.linked {
            return;
        }
        self.detach(token.0);
        self.push_back(token.0);
    }

    /// Frees a connection's slot, detaching it first if still listed.
    pub fn deregister(&mut self, token: ConnToken) {
        let Some(slot) = self.slots[token.0].as_ref() else {
            return;
        };
        if slot.linked {
            self.detach(token.0);
        }
        self.slots[token.0] = None;
        self.free.push(token.0);
        self.live -= 1;
    }

    /// Absolute deadline of the longest-idle connection.
    pub fn next_deadline_us(&self, idle_timeout_us: u64) -> Option<u64> {
        self.head.map(|idx| {
            self.slots[idx]
                .as_ref()
                .expect("listed conn has a slot")
                .idle_since_us
                + idle_timeout_us
        })
    }

    /// Detaches every connection idle since before `cutoff_us` and returns
    /// their kill signals for the caller to fire.
    pub fn pop_expired(&mut self, cutoff_us: u64) -> Vec<Arc<Notify>> {
        let mut kills = Vec::new();
        while let Some(idx) = self.head {
            let slot = self.slots[idx].as_ref().expect("listed conn has a slot");
            if slot.idle_since_us >= cutoff_us {
                break;
            }
            kills.push(Arc::clone(&slot.kill));
            self.detach(idx);
        }
        kills
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().expect("listed conn has a slot");
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().expect("listed conn has a slot").next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().expect("listed conn has a slot").prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slots[idx].as_mut().expect("listed conn has a slot");
        slot.prev = None;
        slot.next = None;
        slot.linked = false;
    }

    fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        {
            let slot = self.slots[idx].as_mut().expect("live conn slot");
            slot.prev = tail;
            slot.next = None;
            slot.linked = true;
        }
        match tail {
            Some(t) => self.slots[t].as_mut().expect("listed conn has a slot").next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}
