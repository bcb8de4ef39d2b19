// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{handle::Entry, CacheKey, InsertOutcome, Priority};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{atomic::Ordering, Arc},
};

type NodeId = usize;

/// LRU list an unreferenced entry lives in
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Pool {
    High,
    Low,
    Bottom,
}

struct Node {
    entry: Arc<Entry>,
    prev: Option<NodeId>,
    next: Option<NodeId>,

    /// Set while the node is linked into an LRU list,
    /// which is exactly when the entry is in cache and has no refs
    pool: Option<Pool>,

    /// Looked up at least once
    hit: bool,
}

/// Doubly linked list of arena nodes, newest at the head
#[derive(Default)]
struct List {
    head: Option<NodeId>,
    tail: Option<NodeId>,
    usage: usize,
}

/// Result of a shard lookup
pub(crate) enum Lookup {
    Hit(Arc<Entry>),
    Dummy,
    Miss,
}

struct ShardState {
    table: HashMap<CacheKey, NodeId, ahash::RandomState>,
    nodes: Vec<Option<Node>>,
    free_slots: Vec<NodeId>,

    high: List,
    low: List,
    bottom: List,

    /// Charges of all entries that are in cache or still pinned
    usage: usize,

    /// Charges of entries in the LRU lists
    lru_usage: usize,

    capacity: usize,
    strict_capacity_limit: bool,

    high_pri_pool_ratio: f64,
    low_pri_pool_ratio: f64,
    high_pri_pool_capacity: usize,
    low_pri_pool_capacity: usize,
}

impl ShardState {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }

    fn list_mut(&mut self, pool: Pool) -> &mut List {
        match pool {
            Pool::High => &mut self.high,
            Pool::Low => &mut self.low,
            Pool::Bottom => &mut self.bottom,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free_slots.pop() {
            if let Some(slot) = self.nodes.get_mut(id) {
                *slot = Some(node);
                return id;
            }
        }

        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    fn dealloc(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.get_mut(id).and_then(Option::take)?;
        self.free_slots.push(id);
        Some(node)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[allow(clippy::cast_precision_loss)]
    fn update_pool_capacities(&mut self) {
        self.high_pri_pool_capacity = (self.capacity as f64 * self.high_pri_pool_ratio) as usize;
        self.low_pri_pool_capacity = (self.capacity as f64 * self.low_pri_pool_ratio) as usize;
    }

    fn push_front(&mut self, pool: Pool, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let charge = node.entry.charge;
        let old_head = self.list_mut(pool).head;

        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = old_head;
            node.pool = Some(pool);
        }

        if let Some(head) = old_head {
            if let Some(head) = self.node_mut(head) {
                head.prev = Some(id);
            }
        }

        let list = self.list_mut(pool);
        list.head = Some(id);
        if list.tail.is_none() {
            list.tail = Some(id);
        }
        list.usage += charge;
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let Some(pool) = node.pool.take() else {
            return;
        };
        let (prev, next, charge) = (node.prev.take(), node.next.take(), node.entry.charge);

        if let Some(p) = prev {
            if let Some(p) = self.node_mut(p) {
                p.next = next;
            }
        } else {
            self.list_mut(pool).head = next;
        }

        if let Some(n) = next {
            if let Some(n) = self.node_mut(n) {
                n.prev = prev;
            }
        } else {
            self.list_mut(pool).tail = prev;
        }

        self.list_mut(pool).usage -= charge;
    }

    /// Links an unreferenced, in-cache node into the pool its
    /// priority and hit state call for.
    fn lru_insert(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        let (priority, hit, charge) = (node.entry.priority, node.hit, node.entry.charge);

        let pool = if self.high_pri_pool_ratio > 0.0 && (priority == Priority::High || hit) {
            Pool::High
        } else if self.low_pri_pool_ratio > 0.0
            && (priority == Priority::High || priority == Priority::Low || hit)
        {
            Pool::Low
        } else {
            Pool::Bottom
        };

        self.push_front(pool, id);
        self.lru_usage += charge;
        self.maintain_pool_size();
    }

    fn lru_remove(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else {
            return;
        };
        if node.pool.is_some() {
            let charge = node.entry.charge;
            self.unlink(id);
            self.lru_usage -= charge;
        }
    }

    /// Demotes the oldest entries of overflowing pools to the next lower pool.
    fn maintain_pool_size(&mut self) {
        while self.high.usage > self.high_pri_pool_capacity {
            let Some(id) = self.high.tail else { break };
            self.unlink(id);
            self.push_front(Pool::Low, id);
        }

        while self.low.usage > self.low_pri_pool_capacity {
            let Some(id) = self.low.tail else { break };
            self.unlink(id);
            self.push_front(Pool::Bottom, id);
        }
    }

    fn oldest(&self) -> Option<NodeId> {
        self.bottom.tail.or(self.low.tail).or(self.high.tail)
    }

    /// Evicts unreferenced entries, lowest priority first, until `charge`
    /// more bytes fit or nothing evictable is left.
    fn evict_from_lru(&mut self, charge: usize, evicted: &mut Vec<Arc<Entry>>) {
        while self.usage + charge > self.capacity {
            let Some(id) = self.oldest() else {
                break;
            };

            self.lru_remove(id);

            let Some(node) = self.dealloc(id) else {
                break;
            };
            self.table.remove(&node.entry.key);
            self.uncharge(&node.entry);
            node.entry.in_cache.store(false, Ordering::Release);

            evicted.push(node.entry);
        }
    }

    fn uncharge(&mut self, entry: &Entry) {
        if entry.charged.swap(false, Ordering::AcqRel) {
            self.usage -= entry.charge;
        }
    }
}

/// One independently locked slice of the primary cache
pub(crate) struct LruCacheShard {
    state: Mutex<ShardState>,
}

impl LruCacheShard {
    pub(crate) fn new(
        capacity: usize,
        strict_capacity_limit: bool,
        high_pri_pool_ratio: f64,
        low_pri_pool_ratio: f64,
    ) -> Self {
        let mut state = ShardState {
            table: HashMap::default(),
            nodes: Vec::new(),
            free_slots: Vec::new(),
            high: List::default(),
            low: List::default(),
            bottom: List::default(),
            usage: 0,
            lru_usage: 0,
            capacity,
            strict_capacity_limit,
            high_pri_pool_ratio,
            low_pri_pool_ratio,
            high_pri_pool_capacity: 0,
            low_pri_pool_capacity: 0,
        };
        state.update_pool_capacities();

        Self {
            state: Mutex::new(state),
        }
    }

    /// Inserts an entry, replacing any entry with the same key.
    ///
    /// Entries that were evicted to make room are appended to `evicted`.
    pub(crate) fn insert(
        &self,
        entry: &Arc<Entry>,
        with_handle: bool,
        evicted: &mut Vec<Arc<Entry>>,
    ) -> crate::Result<InsertOutcome> {
        let mut state = self.state.lock();
        let charge = entry.charge;

        state.evict_from_lru(charge, evicted);

        if state.usage + charge > state.capacity && (state.strict_capacity_limit || !with_handle)
        {
            if with_handle {
                return Err(crate::Error::MemoryLimit);
            }

            // NOTE: Reported as inserted and evicted right away
            evicted.push(entry.clone());
            return Ok(InsertOutcome::EvictedImmediately);
        }

        let id = state.alloc(Node {
            entry: entry.clone(),
            prev: None,
            next: None,
            pool: None,
            hit: false,
        });
        entry.in_cache.store(true, Ordering::Release);
        entry.charged.store(true, Ordering::Release);
        state.usage += charge;

        if let Some(old_id) = state.table.insert(entry.key, id) {
            let was_linked = state.node(old_id).is_some_and(|n| n.pool.is_some());
            state.lru_remove(old_id);

            if let Some(old) = state.dealloc(old_id) {
                old.entry.in_cache.store(false, Ordering::Release);

                // NOTE: Pinned entries keep their charge until their last handle is released
                if was_linked {
                    state.uncharge(&old.entry);
                    evicted.push(old.entry);
                }
            }
        }

        if with_handle {
            entry.refs.fetch_add(1, Ordering::AcqRel);
        } else {
            state.lru_insert(id);
        }

        Ok(if state.usage > state.capacity {
            InsertOutcome::ExceedsCapacity
        } else {
            InsertOutcome::Resident
        })
    }

    /// Charges an entry that is handed out without being inserted.
    ///
    /// Returns `false` if a strict capacity limit does not allow it.
    pub(crate) fn charge_standalone(&self, entry: &Arc<Entry>, evicted: &mut Vec<Arc<Entry>>) -> bool {
        let mut state = self.state.lock();

        state.evict_from_lru(entry.charge, evicted);

        if state.strict_capacity_limit && state.usage + entry.charge > state.capacity {
            return false;
        }

        state.usage += entry.charge;
        entry.charged.store(true, Ordering::Release);
        entry.refs.fetch_add(1, Ordering::AcqRel);

        true
    }

    pub(crate) fn lookup(&self, key: &CacheKey) -> Lookup {
        let mut state = self.state.lock();

        let Some(&id) = state.table.get(key) else {
            return Lookup::Miss;
        };

        state.lru_remove(id);

        let Some(node) = state.node_mut(id) else {
            return Lookup::Miss;
        };

        if node.entry.dummy {
            let entry = node.entry.clone();

            // NOTE: Placeholders are never pinned, put it back
            if !entry.has_refs() {
                state.lru_insert(id);
            }
            return Lookup::Dummy;
        }

        node.hit = true;
        node.entry.refs.fetch_add(1, Ordering::AcqRel);
        Lookup::Hit(node.entry.clone())
    }

    /// Drops one reference.
    ///
    /// Returns `true` if the entry was freed.
    pub(crate) fn release(
        &self,
        entry: &Arc<Entry>,
        erase_if_last_ref: bool,
        evicted: &mut Vec<Arc<Entry>>,
    ) -> bool {
        if entry.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }

        let mut state = self.state.lock();

        // NOTE: Another thread may have looked the entry up in the meantime
        if entry.has_refs() {
            return false;
        }

        if entry.is_in_cache() {
            let Some(&id) = state.table.get(&entry.key) else {
                return false;
            };

            let Some(node) = state.node(id) else {
                return false;
            };
            if !Arc::ptr_eq(&node.entry, entry) || node.pool.is_some() {
                return false;
            }

            if state.usage > state.capacity || erase_if_last_ref {
                state.table.remove(&entry.key);
                state.dealloc(id);
                entry.in_cache.store(false, Ordering::Release);

                if !erase_if_last_ref {
                    evicted.push(entry.clone());
                }
            } else {
                state.lru_insert(id);
                return false;
            }
        }

        state.uncharge(entry);
        true
    }

    pub(crate) fn erase(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        let mut state = self.state.lock();

        let id = state.table.remove(key)?;
        let was_linked = state.node(id).is_some_and(|n| n.pool.is_some());
        state.lru_remove(id);

        let node = state.dealloc(id)?;
        node.entry.in_cache.store(false, Ordering::Release);

        if was_linked {
            state.uncharge(&node.entry);
        }

        // NOTE: Returned so the entry is dropped outside the lock
        Some(node.entry)
    }

    pub(crate) fn set_capacity(&self, capacity: usize, evicted: &mut Vec<Arc<Entry>>) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        state.update_pool_capacities();
        state.maintain_pool_size();
        state.evict_from_lru(0, evicted);
    }

    pub(crate) fn set_strict_capacity_limit(&self, strict: bool) {
        self.state.lock().strict_capacity_limit = strict;
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub(crate) fn usage(&self) -> usize {
        self.state.lock().usage
    }

    pub(crate) fn pinned_usage(&self) -> usize {
        let state = self.state.lock();
        state.usage - state.lru_usage
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.state.lock().table.len()
    }

    pub(crate) fn apply_to_all_entries(&self, f: &mut dyn FnMut(&Entry)) {
        let state = self.state.lock();
        for &id in state.table.values() {
            if let Some(node) = state.node(id) {
                if !node.entry.dummy {
                    f(&node.entry);
                }
            }
        }
    }

    #[cfg(test)]
    fn pool_usages(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.high.usage, state.low.usage, state.bottom.usage)
    }

    #[cfg(test)]
    fn lru_keys(&self) -> Vec<CacheKey> {
        let state = self.state.lock();
        let mut keys = vec![];

        for list in [&state.high, &state.low, &state.bottom] {
            let mut cursor = list.head;
            while let Some(node) = cursor.and_then(|id| state.node(id)) {
                keys.push(node.entry.key);
                cursor = node.next;
            }
        }

        keys
    }
}
