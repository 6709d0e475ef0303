// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Contracts this core consumes from external collaborators, per §6.
//!
//! Byte-exact WAL framing, manifest file layout, and SST table format are
//! out of scope (see spec.md's Non-goals); these traits only pin down the
//! call surface this core's components drive against, the way
//! [`crate::comparator::UserComparator`] pins down key ordering without
//! this core implementing a comparator registry.

use crate::key::InternalKey;
use crate::merge::InternalIterator;
use crate::range_tombstone::fragmenter::FragmentedTombstoneList;
use std::sync::Arc;

/// The write-ahead log this core's memtable writes are mirrored to before
/// being considered durable. Framing and recovery are the implementor's
/// concern.
pub trait LogWriter {
    /// Appends one record (already serialized by the caller).
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    fn append(&mut self, record: &[u8]) -> crate::Result<()>;

    /// Forces buffered writes to stable storage.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    fn sync(&mut self) -> crate::Result<()>;

    /// Current on-disk size of the log file.
    fn file_size(&self) -> u64;
}

/// Applies a batch of version edits to the manifest atomically, invoking
/// `callback` with the final commit status.
///
/// Implementors release and reacquire their own coordinating mutex around
/// the actual I/O, per §6 — [`crate::flush_installer::FlushInstaller`]
/// relies on this to avoid holding its drain lock across an fsync.
pub trait ManifestLogger {
    fn log_and_apply(
        &self,
        edit: &crate::memtable::EditRecord,
        callback: &mut dyn FnMut(crate::Result<()>),
    );
}

/// Options controlling how a [`TableReader`] constructs an iterator or point
/// lookup; opaque to this core beyond being passed through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub verify_checksums: bool,
    pub fill_cache: bool,
}

/// A handle to an on-disk sorted run's table, as consumed by
/// [`crate::merge::merging_iterator::MergingIterator`] and
/// [`crate::range_tombstone::truncated_iter::TruncatedRangeDelIterator`].
///
/// Table byte layout is out of scope for this core; this trait only names
/// the operations a merging iterator drives.
pub trait TableReader {
    /// Builds a child iterator over this table's point keys.
    fn new_iterator(&self, opts: ReadOptions) -> Box<dyn InternalIterator + Send>;

    /// Returns this table's range-tombstone fragment list, if it has any.
    fn new_range_tombstone_iterator(&self, opts: ReadOptions) -> Option<Arc<FragmentedTombstoneList>>;

    /// A direct point lookup, bypassing iterator construction when the
    /// table format supports one (e.g. a block-index probe).
    ///
    /// # Errors
    /// Returns an error on I/O or corruption; `Ok(None)` means provably
    /// absent from this table.
    fn get(&self, key: &InternalKey, opts: ReadOptions) -> crate::Result<Option<crate::key::UserValue>>;
}

/// The secondary-cache contract [`crate::cache::tiered::TieredCache`] is
/// built against, named here to keep the core's dependency on "some
/// secondary tier" explicit even though this crate ships its own reference
/// implementations ([`crate::cache::compressed`], [`crate::cache::nvm`]).
pub trait SecondaryCache {
    fn insert(&self, key: &[u8], value: &crate::cache::CacheValue, helper: &'static crate::cache::CacheHelper);

    fn insert_saved(&self, key: &[u8], bytes: Vec<u8>);

    /// # Errors
    /// Propagates reconstruction failures from a corrupt serialized form.
    fn lookup(&self, key: &[u8]) -> crate::Result<Option<crate::cache::CacheValue>>;

    fn erase(&self, key: &[u8]);

    /// Blocks until every outstanding asynchronous lookup this cache issued
    /// has resolved. This core's reference tiers resolve synchronously, so
    /// implementing it as a no-op is correct for them; a real NVM device
    /// backing would use this to batch I/O completions.
    fn wait_all(&self) {}

    /// Whether `erase` can force an entry out even while callers hold
    /// outstanding references to it.
    fn supports_force_erase(&self) -> bool {
        false
    }
}
