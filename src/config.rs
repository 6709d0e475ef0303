// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The enumerated configuration surface from §6: cache tier/policy choices,
//! compression names, write-batch options, and memtable-list retention
//! limits. Plain enums/structs in the teacher's consuming-builder style
//! (`Config::new().foo(x)`), not a trait object hierarchy.

/// Which primary-tier eviction algorithm a [`crate::cache::Cache`] uses.
///
/// Only `Lru` is implemented by this core
/// ([`crate::cache::lru::ShardedLruCache`]); `Clock` is named here because
/// §6 enumerates it as a configuration value, not because a clock-based
/// implementation ships.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimaryCacheType {
    Lru,
    Clock,
}

impl Default for PrimaryCacheType {
    fn default() -> Self {
        Self::Lru
    }
}

/// How [`crate::cache::tiered::TieredCache`] admits a value into its
/// secondary tiers.
///
/// Only `Placeholder` is implemented by this core
/// ([`crate::cache::tiered::TieredCache::get_or_build`]'s placeholder/
/// promote-on-hit logic); `ThreeQueue` and `AllowAll` are named here
/// because §6 enumerates them as configuration values, not because
/// `TieredCache` reads or switches on this enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TieredAdmissionPolicy {
    /// Admit only placeholders into the compressed tier on a first sighting
    /// (this core's implemented policy, per §4.10).
    Placeholder,
    /// Full three-queue admission: placeholder, then promote-on-second-hit.
    ThreeQueue,
    /// Admit everything unconditionally (no placeholder staging).
    AllowAll,
}

impl Default for TieredAdmissionPolicy {
    fn default() -> Self {
        Self::Placeholder
    }
}

/// Which physical tier a cache sits at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTier {
    /// In-memory, lost on process restart.
    Volatile,
    /// Backed by a block device or NVM, survives a restart.
    NonVolatileBlock,
}

/// Compression codec names. Codec implementations are external to this
/// core; this enum exists so configuration and on-disk metadata can name a
/// codec without this crate depending on every compression library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Snappy,
    Zlib,
    BZip2,
    Lz4,
    Lz4Hc,
    Zstd,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::None
    }
}

/// Per-write options, consumed by the write path that sits above this core
/// (a WAL and write-batch assembler are out of scope here).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteBatchOptions {
    /// Fsync the WAL before acknowledging the write.
    pub sync: bool,
    /// Fail fast with `Busy` instead of blocking when a write would stall.
    pub no_slowdown: bool,
    /// Skip the WAL entirely (durability is the caller's problem).
    pub disable_wal: bool,
    /// Apply to the manifest/flush path without touching the memtable
    /// (used for already-flushed recovery replay).
    pub disable_memtable: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            sync: false,
            no_slowdown: false,
            disable_wal: false,
            disable_memtable: false,
        }
    }
}

impl WriteBatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    #[must_use]
    pub fn no_slowdown(mut self, no_slowdown: bool) -> Self {
        self.no_slowdown = no_slowdown;
        self
    }

    #[must_use]
    pub fn disable_wal(mut self, disable_wal: bool) -> Self {
        self.disable_wal = disable_wal;
        self
    }

    #[must_use]
    pub fn disable_memtable(mut self, disable_memtable: bool) -> Self {
        self.disable_memtable = disable_memtable;
        self
    }
}

/// Retention limits for [`crate::memtable_list::MemTableList`], per §4.4 and
/// §6's "Memtable list" configuration group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemTableListConfig {
    /// Maximum number of sealed memtables (flushed + not-yet-flushed) to
    /// retain before `TrimHistory` starts discarding history.
    pub max_write_buffer_number_to_maintain: usize,
    /// Byte budget `TrimHistory` enforces against `memlist_history`.
    pub max_write_buffer_size_to_maintain: u64,
    /// Minimum number of not-yet-flushed memtables to accumulate before a
    /// flush is triggered (consumed by the flush scheduler above this core;
    /// recorded here since it is part of the same configuration group).
    pub min_write_buffer_number_to_merge: usize,
}

impl Default for MemTableListConfig {
    fn default() -> Self {
        Self {
            max_write_buffer_number_to_maintain: 0,
            max_write_buffer_size_to_maintain: 0,
            min_write_buffer_number_to_merge: 1,
        }
    }
}

impl MemTableListConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_write_buffer_number_to_maintain(mut self, n: usize) -> Self {
        self.max_write_buffer_number_to_maintain = n;
        self
    }

    #[must_use]
    pub fn max_write_buffer_size_to_maintain(mut self, n: u64) -> Self {
        self.max_write_buffer_size_to_maintain = n;
        self
    }

    #[must_use]
    pub fn min_write_buffer_number_to_merge(mut self, n: usize) -> Self {
        self.min_write_buffer_number_to_merge = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn write_batch_options_builder_sets_fields() {
        let opts = WriteBatchOptions::new().sync(true).disable_wal(true);
        assert!(opts.sync);
        assert!(opts.disable_wal);
        assert!(!opts.no_slowdown);
    }

    #[test]
    fn memtable_list_config_defaults_allow_unbounded_retention() {
        let cfg = MemTableListConfig::default();
        assert_eq!(cfg.max_write_buffer_number_to_maintain, 0);
        assert_eq!(cfg.min_write_buffer_number_to_merge, 1);
    }
}
