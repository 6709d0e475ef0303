// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sharded LRU primary cache, per §4.7.
//!
//! `N` independent shards, each behind its own mutex, keyed by a fast hash of
//! the cache key. Within a shard, a single intrusive doubly-linked list (head
//! = most recently used) orders entries; a high-priority pool ratio protects
//! a fraction of capacity from eviction by demoting `High` entries to `Low`
//! the first time the evictor reaches one, rather than evicting them
//! outright. Entries with an outstanding refcount are unlinked from the list
//! entirely (pinned) and rejoin at the head on release.

use super::{Cache, CacheEntry, CacheHelper, CacheValue, Handle, Priority};
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Invoked with `(key, evicted_entry)` whenever capacity pressure evicts an
/// entry outright (not a demotion). The tiered admission policy uses this to
/// spill into the compressed secondary tier, per §4.10.
pub type EvictCallback = dyn Fn(&[u8], &CacheEntry) + Send + Sync;

struct Node {
    key: Box<[u8]>,
    entry: CacheEntry,
    /// `None` while pinned (refcount > 0): unlinked from the LRU list.
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

struct Shard {
    map: HashMap<Box<[u8]>, usize>,
    slab: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    usage: usize,
    high_pri_usage: usize,
    capacity: usize,
    high_pri_pool_ratio: f64,
    on_evict: Option<Arc<EvictCallback>>,
}

impl Shard {
    fn new(capacity: usize, high_pri_pool_ratio: f64, on_evict: Option<Arc<EvictCallback>>) -> Self {
        Self {
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            usage: 0,
            high_pri_usage: 0,
            capacity,
            high_pri_pool_ratio,
            on_evict,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            #[expect(clippy::expect_used, reason = "idx is always a live slab slot")]
            let node = self.slab[idx].as_mut().expect("live slot");
            if !node.linked {
                return;
            }
            node.linked = false;
            (node.prev.take(), node.next.take())
        };

        match prev {
            Some(p) => {
                #[expect(clippy::expect_used, reason = "prev is always a live slab slot")]
                self.slab[p].as_mut().expect("live slot").next = next;
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                #[expect(clippy::expect_used, reason = "next is always a live slab slot")]
                self.slab[n].as_mut().expect("live slot").prev = prev;
            }
            None => self.tail = prev,
        }
    }

    /// Links `idx` at the head (most recently used position).
    fn link_at_head(&mut self, idx: usize) {
        let old_head = self.head;
        {
            #[expect(clippy::expect_used, reason = "idx is always a live slab slot")]
            let node = self.slab[idx].as_mut().expect("live slot");
            node.prev = None;
            node.next = old_head;
            node.linked = true;
        }
        if let Some(h) = old_head {
            #[expect(clippy::expect_used, reason = "old_head is always a live slab slot")]
            self.slab[h].as_mut().expect("live slot").prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        self.unlink(idx);
        self.link_at_head(idx);
    }

    /// Evicts from the LRU tail until `usage + incoming_charge <= capacity`,
    /// demoting protected high-priority entries instead of evicting them on
    /// the first pass, per §4.7.
    fn make_room(&mut self, incoming_charge: usize) {
        while self.usage + incoming_charge > self.capacity {
            let Some(tail) = self.tail else { break };

            let high_pri_budget = (self.capacity as f64 * self.high_pri_pool_ratio) as usize;

            #[expect(clippy::expect_used, reason = "tail is always a live slab slot")]
            let is_protected_high_pri = {
                let node = self.slab[tail].as_ref().expect("live slot");
                node.entry.priority == Priority::High && self.high_pri_usage <= high_pri_budget
            };

            if is_protected_high_pri {
                self.unlink(tail);
                #[expect(clippy::expect_used, reason = "tail is always a live slab slot")]
                let charge = {
                    let node = self.slab[tail].as_mut().expect("live slot");
                    node.entry.priority = Priority::Low;
                    node.entry.charge
                };
                self.high_pri_usage = self.high_pri_usage.saturating_sub(charge);
                self.link_at_head(tail);
                log::trace!("demoted high-priority entry at slot {tail} to low priority");
                continue;
            }

            self.evict_slot(tail);
        }
    }

    fn evict_slot(&mut self, idx: usize) {
        self.unlink(idx);
        #[expect(clippy::expect_used, reason = "idx is always a live slab slot")]
        let node = self.slab[idx].take().expect("live slot");
        self.map.remove(&node.key);
        self.usage = self.usage.saturating_sub(node.entry.charge);
        if node.entry.priority == Priority::High {
            self.high_pri_usage = self.high_pri_usage.saturating_sub(node.entry.charge);
        }
        if let Some(cb) = &self.on_evict {
            log::trace!("evicting {} byte entry, spilling to secondary tier", node.entry.charge);
            cb(&node.key, &node.entry);
        }
        self.free.push(idx);
    }
}

/// A sharded, in-memory LRU cache implementing the primary-tier contract of
/// §4.7.
pub struct ShardedLruCache {
    shards: Vec<Mutex<Shard>>,
    handles: Mutex<HashMap<u64, (usize, Box<[u8]>)>>,
    next_handle: AtomicU64,
    /// Every handle id ever released, so a double-release is caught rather
    /// than silently ignored. Debug-only per §4.7's Testable Property 6
    /// ("double-release is detectable in debug builds"); handle ids are
    /// never reused ([`Self::next_handle`] is monotonic), so membership
    /// alone is enough to detect reuse.
    #[cfg(debug_assertions)]
    released_handles: Mutex<std::collections::HashSet<u64>>,
}

impl ShardedLruCache {
    /// # Panics
    /// Panics if `num_shards == 0`.
    #[must_use]
    pub fn new(capacity_bytes: usize, num_shards: usize, high_pri_pool_ratio: f64) -> Self {
        Self::with_evict_callback(capacity_bytes, num_shards, high_pri_pool_ratio, None)
    }

    /// As [`Self::new`], but `on_evict` is invoked for every entry evicted
    /// outright (never for demotions), letting a caller spill to a secondary
    /// tier. See [`EvictCallback`].
    ///
    /// # Panics
    /// Panics if `num_shards == 0`.
    #[must_use]
    pub fn with_evict_callback(
        capacity_bytes: usize,
        num_shards: usize,
        high_pri_pool_ratio: f64,
        on_evict: Option<Arc<EvictCallback>>,
    ) -> Self {
        assert!(num_shards > 0, "must have at least one shard");
        let per_shard = capacity_bytes / num_shards;

        Self {
            shards: (0..num_shards)
                .map(|_| Mutex::new(Shard::new(per_shard, high_pri_pool_ratio, on_evict.clone())))
                .collect(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            #[cfg(debug_assertions)]
            released_handles: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Mutex<Shard> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    #[must_use]
    pub fn usage(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
                s.lock().expect("lock poisoned").usage
            })
            .sum()
    }
}

impl Cache for ShardedLruCache {
    fn insert(
        &self,
        key: &[u8],
        value: CacheValue,
        charge: usize,
        helper: &'static CacheHelper,
        priority: Priority,
    ) -> Handle {
        let shard_lock = self.shard_for(key);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut shard = shard_lock.lock().expect("lock poisoned");

        if let Some(&idx) = shard.map.get(key) {
            shard.evict_slot(idx);
        }

        shard.make_room(charge);

        let idx = shard.free.pop().unwrap_or(shard.slab.len());
        let node = Node {
            key: key.into(),
            entry: CacheEntry {
                value,
                charge,
                helper,
                priority,
                refcount: 1,
            },
            prev: None,
            next: None,
            linked: false,
        };

        if idx == shard.slab.len() {
            shard.slab.push(Some(node));
        } else {
            shard.slab[idx] = Some(node);
        }

        shard.map.insert(key.into(), idx);
        shard.usage += charge;
        if priority == Priority::High {
            shard.high_pri_usage += charge;
        }

        // New entries start pinned by the caller's returned handle, so they
        // are not linked into the LRU list until released.
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.handles
            .lock()
            .expect("lock poisoned")
            .insert(handle_id, (idx, key.into()));

        Handle(handle_id)
    }

    fn lookup(&self, key: &[u8]) -> Option<Handle> {
        let shard_lock = self.shard_for(key);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut shard = shard_lock.lock().expect("lock poisoned");

        let idx = *shard.map.get(key)?;
        shard.unlink(idx);
        #[expect(clippy::expect_used, reason = "idx is always a live slab slot")]
        {
            shard.slab[idx].as_mut().expect("live slot").entry.refcount += 1;
        }
        drop(shard);

        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.handles
            .lock()
            .expect("lock poisoned")
            .insert(handle_id, (idx, key.into()));

        Some(Handle(handle_id))
    }

    fn release(&self, handle: Handle, erase_if_last_ref: bool) {
        #[cfg(debug_assertions)]
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut released = self.released_handles.lock().expect("lock poisoned");
            assert!(
                released.insert(handle.0),
                "double release of cache handle {handle:?}: a handle may only be released once"
            );
        }

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let Some((idx, key)) = self
            .handles
            .lock()
            .expect("lock poisoned")
            .remove(&handle.0)
        else {
            return;
        };

        let shard_lock = self.shard_for(&key);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut shard = shard_lock.lock().expect("lock poisoned");

        let Some(node) = shard.slab.get_mut(idx).and_then(Option::as_mut) else {
            return;
        };
        node.entry.refcount = node.entry.refcount.saturating_sub(1);

        if node.entry.refcount == 0 {
            if erase_if_last_ref {
                shard.evict_slot(idx);
            } else {
                shard.link_at_head(idx);
            }
        }
    }

    fn value(&self, handle: Handle) -> Option<CacheValue> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let (idx, key) = self
            .handles
            .lock()
            .expect("lock poisoned")
            .get(&handle.0)
            .cloned()?;

        let shard_lock = self.shard_for(&key);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let shard = shard_lock.lock().expect("lock poisoned");
        shard.slab.get(idx)?.as_ref().map(|n| n.entry.value.clone())
    }

    fn erase(&self, key: &[u8]) {
        let shard_lock = self.shard_for(key);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut shard = shard_lock.lock().expect("lock poisoned");
        if let Some(&idx) = shard.map.get(key) {
            shard.evict_slot(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Slice;
    use test_log::test;

    fn helper() -> &'static CacheHelper {
        static H: CacheHelper = CacheHelper {
            name: "test",
            size_of: |_| 0,
            serialize_to: None,
            construct_from: None,
        };
        &H
    }

    #[test]
    fn insert_then_release_then_lookup_hits() {
        let cache = ShardedLruCache::new(1024, 1, 0.5);
        let h = cache.insert(b"k", CacheValue::Bytes(Slice::from("v")), 10, helper(), Priority::Low);
        cache.release(h, false);

        let looked_up = cache.lookup(b"k").unwrap();
        assert_eq!(
            cache.value(looked_up).unwrap().as_bytes().unwrap().as_ref(),
            b"v"
        );
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache = ShardedLruCache::new(20, 1, 0.0);

        let h1 = cache.insert(b"a", CacheValue::Bytes(Slice::from("1")), 10, helper(), Priority::Low);
        cache.release(h1, false);
        let h2 = cache.insert(b"b", CacheValue::Bytes(Slice::from("2")), 10, helper(), Priority::Low);
        cache.release(h2, false);

        // Capacity is 20; inserting a third 10-byte entry must evict "a" (LRU).
        let h3 = cache.insert(b"c", CacheValue::Bytes(Slice::from("3")), 10, helper(), Priority::Low);
        cache.release(h3, false);

        assert!(cache.lookup(b"a").is_none());
        assert!(cache.lookup(b"b").is_some());
        assert!(cache.lookup(b"c").is_some());
    }

    #[test]
    fn pinned_entry_survives_eviction_pressure() {
        let cache = ShardedLruCache::new(20, 1, 0.0);

        let h1 = cache.insert(b"a", CacheValue::Bytes(Slice::from("1")), 10, helper(), Priority::Low);
        // h1 stays held (pinned): not released, so it cannot be evicted.
        let h2 = cache.insert(b"b", CacheValue::Bytes(Slice::from("2")), 10, helper(), Priority::Low);
        cache.release(h2, false);

        let h3 = cache.insert(b"c", CacheValue::Bytes(Slice::from("3")), 10, helper(), Priority::Low);
        cache.release(h3, false);

        assert!(cache.lookup(b"a").is_some(), "pinned entry must survive");
        cache.release(h1, false);
    }

    #[test]
    fn erase_if_last_ref_removes_placeholder_on_release() {
        let cache = ShardedLruCache::new(1024, 1, 0.5);
        let h = cache.insert(b"ph", CacheValue::Bytes(Slice::from("")), 0, helper(), Priority::Low);
        cache.release(h, true);

        assert!(cache.lookup(b"ph").is_none());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "double release"))]
    fn double_release_of_same_handle_panics_in_debug() {
        let cache = ShardedLruCache::new(1024, 1, 0.5);
        let h = cache.insert(b"k", CacheValue::Bytes(Slice::from("v")), 1, helper(), Priority::Low);
        cache.release(h, false);
        cache.release(h, false);
    }

    #[test]
    fn high_priority_entries_are_protected_within_pool_ratio() {
        // Pool ratio 0.5 of a 20-byte shard reserves 10 bytes for High entries.
        let cache = ShardedLruCache::new(20, 1, 0.5);

        let high = cache.insert(b"hot", CacheValue::Bytes(Slice::from("h")), 10, helper(), Priority::High);
        cache.release(high, false);

        let low1 = cache.insert(b"l1", CacheValue::Bytes(Slice::from("1")), 5, helper(), Priority::Low);
        cache.release(low1, false);

        // This insert needs 10 more bytes; "hot" is protected (high-pri usage
        // stays <= 10) so "l1" (low-pri) is evicted instead, even though
        // "hot" sits further from the head by now.
        let low2 = cache.insert(b"l2", CacheValue::Bytes(Slice::from("2")), 10, helper(), Priority::Low);
        cache.release(low2, false);

        assert!(cache.lookup(b"hot").is_some());
    }

    #[test]
    fn random_insert_release_sequence_never_exceeds_capacity() {
        use rand::Rng;

        let cache = ShardedLruCache::new(2_048, 4, 0.3);
        let mut rng = rand::rng();

        for _ in 0..5_000 {
            let key = format!("k{}", rng.random_range(0..64));
            let priority = if rng.random_bool(0.2) { Priority::High } else { Priority::Low };
            let h = cache.insert(key.as_bytes(), CacheValue::Bytes(Slice::from("x")), 16, helper(), priority);

            if rng.random_bool(0.9) {
                cache.release(h, rng.random_bool(0.05));
            }
            // Unreleased handles simulate a pinned reader that never lets go
            // within this run; the cache must still respect capacity for
            // everything that *was* released.
        }

        assert!(cache.usage() <= 2_048, "usage must never exceed total capacity");
    }
}
