// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compressed secondary cache, per §4.8.
//!
//! Holds the serialized (typically compressed) form of values evicted from
//! the primary tier. Lookup reconstructs via the helper's `construct_from`;
//! insertion serializes via `serialize_to`. Entries whose helper lacks a
//! serializer (the placeholder helper) are stored as a zero-length marker,
//! fast to admit and erase, matching the placeholder contract from §3.

use super::{CacheHelper, CacheValue};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

struct Entry {
    helper: &'static CacheHelper,
    bytes: Vec<u8>,
}

/// Invoked with `(key, serialized_bytes, helper)` when capacity pressure
/// evicts a non-empty entry, so a caller can spill it to the NVM tier.
pub type EvictCallback = dyn Fn(&[u8], &[u8], &'static CacheHelper) + Send + Sync;

/// A secondary cache storing the serialized form of evicted primary-tier
/// values, bounded by total serialized bytes.
pub struct CompressedSecondaryCache {
    entries: Mutex<FxHashMap<Box<[u8]>, Entry>>,
    capacity: usize,
    usage: Mutex<usize>,
    /// Insertion order, oldest first, for FIFO-style eviction: the
    /// compressed tier favors simplicity here since it is itself just a
    /// staging point before NVM admission, not the final resting place.
    order: Mutex<Vec<Box<[u8]>>>,
    on_evict: Option<Arc<EvictCallback>>,
}

impl CompressedSecondaryCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_evict_callback(capacity, None)
    }

    #[must_use]
    pub fn with_evict_callback(capacity: usize, on_evict: Option<Arc<EvictCallback>>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            capacity,
            usage: Mutex::new(0),
            order: Mutex::new(Vec::new()),
            on_evict,
        }
    }

    /// Stores a placeholder marker for `key`, recording only that this
    /// fingerprint has been admitted (the Tiered Cache Placeholder of §3).
    pub fn insert_placeholder(&self, key: &[u8], helper: &'static CacheHelper) {
        self.insert_serialized(key, helper, Vec::new());
    }

    /// Serializes `value` via `helper.serialize_to` and admits it.
    ///
    /// No-op if the helper carries no serializer (placeholder helpers, or
    /// helpers for values this core chose not to compress).
    pub fn insert(&self, key: &[u8], value: &CacheValue, helper: &'static CacheHelper) {
        let Some(serialize_to) = helper.serialize_to else {
            return;
        };
        self.insert_serialized(key, helper, serialize_to(value));
    }

    fn insert_serialized(&self, key: &[u8], helper: &'static CacheHelper, bytes: Vec<u8>) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut entries = self.entries.lock().expect("lock poisoned");
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut usage = self.usage.lock().expect("lock poisoned");
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut order = self.order.lock().expect("lock poisoned");

        if let Some(old) = entries.remove(key) {
            *usage -= old.bytes.len();
            order.retain(|k| k.as_ref() != key);
        }

        while *usage + bytes.len() > self.capacity {
            let Some(victim) = order.first().cloned() else {
                break;
            };
            order.remove(0);
            if let Some(evicted) = entries.remove(victim.as_ref()) {
                *usage -= evicted.bytes.len();
                if !evicted.bytes.is_empty() {
                    if let Some(cb) = &self.on_evict {
                        cb(&victim, &evicted.bytes, evicted.helper);
                    }
                }
            }
        }

        *usage += bytes.len();
        order.push(key.into());
        entries.insert(key.into(), Entry { helper, bytes });
    }

    /// Looks up `key`. Returns `None` on a miss, `Some(None)` for a
    /// placeholder hit (fingerprint known but no payload), and
    /// `Some(Some(value))` for a real hit reconstructed via the helper.
    ///
    /// # Errors
    /// Propagates `construct_from` failures (corrupt serialized bytes).
    pub fn lookup(&self, key: &[u8]) -> Option<crate::Result<Option<CacheValue>>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let entries = self.entries.lock().expect("lock poisoned");
        let entry = entries.get(key)?;

        if entry.bytes.is_empty() {
            return Some(Ok(None));
        }

        let Some(construct_from) = entry.helper.construct_from else {
            return Some(Ok(None));
        };

        Some(construct_from(&entry.bytes).map(Some))
    }

    pub fn erase(&self, key: &[u8]) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut entries = self.entries.lock().expect("lock poisoned");
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut usage = self.usage.lock().expect("lock poisoned");
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut order = self.order.lock().expect("lock poisoned");

        if let Some(old) = entries.remove(key) {
            *usage -= old.bytes.len();
            order.retain(|k| k.as_ref() != key);
        }
    }

    #[must_use]
    pub fn usage(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        *self.usage.lock().expect("lock poisoned")
    }
}
