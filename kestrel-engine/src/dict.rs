//! # Incremental Hash Map
//!
//! Chained hash map that spreads the cost of a resize across subsequent
//! operations instead of rehashing everything at once.
//!
//! ## Structure Overview
//!
//! ```text
//! Dict<T>
//!   ├── nodes: Vec<Option<Node<T>>>     dense slab, stable ids
//!   ├── free: Vec<usize>                recycled slab slots
//!   ├── primary: Table                  all inserts land here
//!   ├── secondary: Option<Table>        old table, drained during a resize
//!   └── migrate_pos: usize              next secondary slot to drain
//!         Table { slots: Vec<Option<usize>>, mask, len }
//!         Node  { hcode: u32, next: Option<usize>, data: T }
//! ```
//!
//! A node's slab index is a stable handle for its whole lifetime: migration
//! between tables only relinks chains, it never moves the node. Other
//! structures (the TTL heap, a sorted set's name index) hold these ids.
//!
//! Every mutating operation first migrates at most [`REHASH_WORK`] nodes
//! from `secondary` into `primary`. A resize starts when the primary's
//! average chain length reaches [`MAX_LOAD_FACTOR`]; the primary becomes the
//! secondary and a new primary of double capacity takes its place. Lookups
//! consult the primary first, then the secondary.

use std::hash::{BuildHasher, Hasher};

use ahash::RandomState;

/// Initial primary-table capacity. Always a power of two.
const INITIAL_CAP: usize = 4;

/// Average chain length that triggers a resize.
pub const MAX_LOAD_FACTOR: usize = 8;

/// Upper bound on nodes migrated per operation.
pub const REHASH_WORK: usize = 128;

#[derive(Debug)]
struct Node<T> {
    hcode: u32,
    next: Option<usize>,
    data: T,
}

#[derive(Debug)]
struct Table {
    /// Chain heads, holding slab indices.
    slots: Vec<Option<usize>>,
    mask: usize,
    len: usize,
}

impl Table {
    fn new(cap: usize) -> Self {
        debug_assert!(cap.is_power_of_two());
        Table {
            slots: vec![None; cap],
            mask: cap - 1,
            len: 0,
        }
    }
}

/// Incrementally-resized chained hash map with stable node ids.
///
/// Callers precompute the 32-bit hash code through [`Dict::hash`] and pass
/// it together with an equality predicate on the stored data; the map never
/// inspects `T` itself.
#[derive(Debug)]
pub struct Dict<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    primary: Table,
    secondary: Option<Table>,
    migrate_pos: usize,
    hasher: RandomState,
}

impl<T> Default for Dict<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dict<T> {
    pub fn new() -> Self {
        Dict {
            nodes: Vec::new(),
            free: Vec::new(),
            primary: Table::new(INITIAL_CAP),
            secondary: None,
            migrate_pos: 0,
            hasher: RandomState::new(),
        }
    }

    /// Hashes a byte string with this map's hasher.
    ///
    /// Codes from one map are not comparable with another map's.
    pub fn hash(&self, bytes: &[u8]) -> u32 {
        let mut hasher = self.hasher.build_hasher();
        hasher.write(bytes);
        hasher.finish() as u32
    }

    pub fn len(&self) -> usize {
        self.primary.len + self.secondary.as_ref().map_or(0, |t| t.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a resize is being drained.
    pub fn is_resizing(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn get(&self, id: usize) -> &T {
        &self.nodes[id].as_ref().expect("live dict node").data
    }

    pub fn get_mut(&mut self, id: usize) -> &mut T {
        &mut self.nodes[id].as_mut().expect("live dict node").data
    }

    /// Inserts a node and returns its stable id. Duplicate detection is the
    /// caller's job.
    pub fn insert(&mut self, hcode: u32, data: T) -> usize {
        let id = self.alloc(Node {
            hcode,
            next: None,
            data,
        });
        link(&mut self.primary, &mut self.nodes, id);
        if self.secondary.is_none()
            && self.primary.len >= MAX_LOAD_FACTOR * (self.primary.mask + 1)
        {
            self.start_resize();
        }
        self.step_migration();
        id
    }

    /// Finds the id of the node matching `hcode` and the predicate.
    pub fn find(&mut self, hcode: u32, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
        self.step_migration();
        if let Some((_, id)) = chain_find(&self.primary, &self.nodes, hcode, &mut eq) {
            return Some(id);
        }
        let sec = self.secondary.as_ref()?;
        chain_find(sec, &self.nodes, hcode, &mut eq).map(|(_, id)| id)
    }

    /// Detaches the matching node and hands its data to the caller.
    pub fn remove(&mut self, hcode: u32, mut eq: impl FnMut(&T) -> bool) -> Option<T> {
        self.step_migration();
        if let Some((prev, id)) = chain_find(&self.primary, &self.nodes, hcode, &mut eq) {
            unlink(&mut self.primary, &mut self.nodes, prev, id);
            return Some(self.release(id));
        }
        if let Some(sec) = self.secondary.as_mut() {
            if let Some((prev, id)) = chain_find(sec, &self.nodes, hcode, &mut eq) {
                unlink(sec, &mut self.nodes, prev, id);
                return Some(self.release(id));
            }
        }
        None
    }

    /// Detaches a node by id. The id must be live.
    pub fn detach(&mut self, id: usize) -> T {
        self.step_migration();
        let hcode = self.nodes[id].as_ref().expect("live dict node").hcode;
        if let Some(prev) = chain_position(&self.primary, &self.nodes, hcode, id) {
            unlink(&mut self.primary, &mut self.nodes, prev, id);
        } else {
            let sec = self.secondary.as_mut().expect("node is in one table");
            let prev = chain_position(sec, &self.nodes, hcode, id).expect("node is in one table");
            unlink(sec, &mut self.nodes, prev, id);
        }
        self.release(id)
    }

    /// Visits every stored value, walking the chains of both tables.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for table in std::iter::once(&self.primary).chain(self.secondary.iter()) {
            for head in &table.slots {
                let mut cur = *head;
                while let Some(id) = cur {
                    let node = self.nodes[id].as_ref().expect("live dict node");
                    f(&node.data);
                    cur = node.next;
                }
            }
        }
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: usize) -> T {
        let node = self.nodes[id].take().expect("live dict node");
        self.free.push(id);
        node.data
    }

    fn start_resize(&mut self) {
        debug_assert!(self.secondary.is_none());
        let cap = (self.primary.mask + 1) * 2;
        let old = std::mem::replace(&mut self.primary, Table::new(cap));
        self.secondary = Some(old);
        self.migrate_pos = 0;
    }

    /// Moves at most [`REHASH_WORK`] nodes from the secondary into the
    /// primary, advancing the migration cursor over empty slots for free.
    fn step_migration(&mut self) {
        let Some(sec) = self.secondary.as_mut() else {
            return;
        };
        let mut moved = 0;
        while moved < REHASH_WORK && sec.len > 0 {
            match sec.slots[self.migrate_pos] {
                None => self.migrate_pos += 1,
                Some(id) => {
                    sec.slots[self.migrate_pos] =
                        self.nodes[id].as_ref().expect("live dict node").next;
                    sec.len -= 1;
                    link(&mut self.primary, &mut self.nodes, id);
                    moved += 1;
                }
            }
        }
        let drained = sec.len == 0;
        if drained {
            self.secondary = None;
            self.migrate_pos = 0;
        }
    }

    #[cfg(test)]
    fn chain_len_sum(&self) -> usize {
        let mut n = 0;
        self.for_each(|_| n += 1);
        n
    }
}

/// Pushes a node at the head of its chain in `table`.
fn link<T>(table: &mut Table, nodes: &mut [Option<Node<T>>], id: usize) {
    let node = nodes[id].as_mut().expect("live dict node");
    let slot = (node.hcode as usize) & table.mask;
    node.next = table.slots[slot];
    table.slots[slot] = Some(id);
    table.len += 1;
}

/// Unlinks a node given its chain predecessor (None when it is the head).
fn unlink<T>(table: &mut Table, nodes: &mut [Option<Node<T>>], prev: Option<usize>, id: usize) {
    let next = nodes[id].as_ref().expect("live dict node").next;
    match prev {
        Some(p) => nodes[p].as_mut().expect("live dict node").next = next,
        None => {
            let hcode = nodes[id].as_ref().expect("live dict node").hcode;
            let slot = (hcode as usize) & table.mask;
            table.slots[slot] = next;
        }
    }
    table.len -= 1;
}

/// Walks the chain for `hcode`, returning (predecessor, id) of the first
/// node matching the predicate.
fn chain_find<T>(
    table: &Table,
    nodes: &[Option<Node<T>>],
    hcode: u32,
    eq: &mut impl FnMut(&T) -> bool,
) -> Option<(Option<usize>, usize)> {
    let slot = (hcode as usize) & table.mask;
    let mut prev = None;
    let mut cur = table.slots[slot];
    while let Some(id) = cur {
        let node = nodes[id].as_ref().expect("live dict node");
        if node.hcode == hcode && eq(&node.data) {
            return Some((prev, id));
        }
        prev = Some(id);
        cur = node.next;
    }
    None
}

/// Locates a node by identity in its chain, returning its predecessor.
fn chain_position<T>(
    table: &Table,
    nodes: &[Option<Node<T>>],
    hcode: u32,
    id: usize,
) -> Option<Option<usize>> {
    let slot = (hcode as usize) & table.mask;
    let mut prev = None;
    let mut cur = table.slots[slot];
    while let Some(n) = cur {
        if n == id {
            return Some(prev);
        }
        prev = Some(n);
        cur = nodes[n].as_ref().expect("live dict node").next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> Vec<u8> {
        format!("key-{i}").into_bytes()
    }

    fn insert_key(dict: &mut Dict<Vec<u8>>, i: usize) -> usize {
        let k = key(i);
        let hcode = dict.hash(&k);
        dict.insert(hcode, k)
    }

    fn find_key(dict: &mut Dict<Vec<u8>>, i: usize) -> Option<usize> {
        let k = key(i);
        let hcode = dict.hash(&k);
        dict.find(hcode, |data| *data == k)
    }

    #[test]
    fn insert_find_remove() {
        let mut dict = Dict::new();
        insert_key(&mut dict, 1);
        insert_key(&mut dict, 2);
        assert_eq!(dict.len(), 2);

        let id = find_key(&mut dict, 1).unwrap();
        assert_eq!(dict.get(id), &key(1));
        assert!(find_key(&mut dict, 3).is_none());

        let k = key(2);
        let hcode = dict.hash(&k);
        assert_eq!(dict.remove(hcode, |data| *data == k), Some(key(2)));
        assert_eq!(dict.len(), 1);
        assert!(find_key(&mut dict, 2).is_none());
    }

    #[test]
    fn resize_keeps_every_key_reachable() {
        let mut dict = Dict::new();
        let n = 5000;
        for i in 0..n {
            insert_key(&mut dict, i);
        }
        for i in 0..n {
            assert!(find_key(&mut dict, i).is_some(), "key {i} lost");
        }
        assert_eq!(dict.len(), n);
        assert_eq!(dict.chain_len_sum(), n);
    }

    #[test]
    fn size_matches_chain_sum_mid_resize() {
        let mut dict = Dict::new();
        let mut expected = 0usize;
        for i in 0..2000 {
            insert_key(&mut dict, i);
            expected += 1;
            if i % 3 == 0 {
                let k = key(i);
                let hcode = dict.hash(&k);
                assert!(dict.remove(hcode, |data| *data == k).is_some());
                expected -= 1;
            }
            assert_eq!(dict.len(), expected);
            assert_eq!(dict.chain_len_sum(), expected);
        }
    }

    #[test]
    fn migration_eventually_drains_secondary() {
        let mut dict = Dict::new();
        for i in 0..1000 {
            insert_key(&mut dict, i);
        }
        // Enough read traffic to finish any in-flight migration.
        let mut reads = 0;
        while dict.is_resizing() && reads < 100 {
            find_key(&mut dict, 0);
            reads += 1;
        }
        assert!(!dict.is_resizing());
        assert_eq!(dict.chain_len_sum(), 1000);
    }

    #[test]
    fn node_ids_are_stable_across_migration() {
        let mut dict = Dict::new();
        let id = insert_key(&mut dict, 0);
        for i in 1..3000 {
            insert_key(&mut dict, i);
        }
        assert_eq!(dict.get(id), &key(0));
        assert_eq!(dict.detach(id), key(0));
        assert_eq!(dict.len(), 2999);
    }

    #[test]
    fn slab_slots_are_recycled() {
        let mut dict = Dict::new();
        let a = insert_key(&mut dict, 1);
        let k = key(1);
        let hcode = dict.hash(&k);
        dict.remove(hcode, |data| *data == k).unwrap();
        let b = insert_key(&mut dict, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn for_each_visits_both_tables() {
        let mut dict = Dict::new();
        // A resize at 256 entries leaves 256 nodes in the secondary and one
        // migration step drains only REHASH_WORK of them, so the scan below
        // runs with both tables populated.
        for i in 0..256 {
            insert_key(&mut dict, i);
        }
        assert!(dict.is_resizing());
        let mut seen = 0;
        dict.for_each(|_| seen += 1);
        assert_eq!(seen, dict.len());
        assert_eq!(seen, 256);
    }
}
