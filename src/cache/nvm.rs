// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Non-volatile secondary cache, per §4.9.
//!
//! The core only specifies the interface a non-volatile tier must expose:
//! ordinary `insert`/`lookup`, plus `insert_saved` which admits a payload
//! that has already been compressed by a higher tier rather than compressing
//! it again. Real persistence (the actual device I/O, block layout on the
//! backing file) is out of scope; this is an in-memory stand-in that
//! satisfies the same contract so the tiered admission policy above it can
//! be exercised and tested.

use super::CacheHelper;
use std::collections::HashMap;
use std::sync::Mutex;

/// Names the compression applied to a payload admitted via
/// [`NvmSecondaryCache::insert_saved`], so a future read can tell whether
/// `construct_from` is handed already-decompressed or still-compressed
/// bytes. This core does not interpret the value itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

/// Which tier produced a payload handed to [`NvmSecondaryCache::insert_saved`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceTier {
    Primary,
    Compressed,
}

struct Entry {
    bytes: Vec<u8>,
    compression: CompressionType,
    #[expect(dead_code, reason = "kept for provenance/debugging, not read by lookup")]
    source: SourceTier,
}

pub struct NvmSecondaryCache {
    entries: Mutex<HashMap<Box<[u8]>, Entry>>,
    capacity: usize,
    usage: Mutex<usize>,
    order: Mutex<Vec<Box<[u8]>>>,
}

impl NvmSecondaryCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            usage: Mutex::new(0),
            order: Mutex::new(Vec::new()),
        }
    }

    fn admit(&self, key: &[u8], bytes: Vec<u8>, compression: CompressionType, source: SourceTier) {
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
            }
        }

        *usage += bytes.len();
        order.push(key.into());
        entries.insert(
            key.into(),
            Entry {
                bytes,
                compression,
                source,
            },
        );
    }

    /// Compresses and admits `value` freshly, via the helper's
    /// `serialize_to` (mirrors [`super::compressed::CompressedSecondaryCache::insert`]).
    pub fn insert(&self, key: &[u8], value: &super::CacheValue, helper: &'static CacheHelper) {
        let Some(serialize_to) = helper.serialize_to else {
            return;
        };
        self.admit(
            key,
            serialize_to(value),
            CompressionType::None,
            SourceTier::Primary,
        );
    }

    /// Admits an already-compressed payload produced by a higher tier's
    /// eviction, without recompressing it, per §4.9.
    pub fn insert_saved(
        &self,
        key: &[u8],
        bytes: Vec<u8>,
        compression: CompressionType,
        source: SourceTier,
    ) {
        self.admit(key, bytes, compression, source);
    }

    /// Returns the raw stored bytes and their compression tag, if present.
    #[must_use]
    pub fn lookup_raw(&self, key: &[u8]) -> Option<(Vec<u8>, CompressionType)> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let entries = self.entries.lock().expect("lock poisoned");
        entries.get(key).map(|e| (e.bytes.clone(), e.compression))
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

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn insert_saved_stores_raw_bytes_untouched() {
        let cache = NvmSecondaryCache::new(1024);
        cache.insert_saved(b"k", vec![1, 2, 3], CompressionType::Lz4, SourceTier::Compressed);

        let (bytes, compression) = cache.lookup_raw(b"k").unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(compression, CompressionType::Lz4);
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache = NvmSecondaryCache::new(5);
        cache.insert_saved(b"a", vec![0; 5], CompressionType::None, SourceTier::Primary);
        cache.insert_saved(b"b", vec![0; 5], CompressionType::None, SourceTier::Primary);

        assert!(cache.lookup_raw(b"a").is_none());
        assert!(cache.lookup_raw(b"b").is_some());
    }

    #[test]
    fn erase_removes_entry() {
        let cache = NvmSecondaryCache::new(1024);
        cache.insert_saved(b"k", vec![9], CompressionType::None, SourceTier::Primary);
        cache.erase(b"k");
        assert!(cache.lookup_raw(b"k").is_none());
    }
}
