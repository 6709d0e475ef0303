// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A primitive core of an LSM-tree storage engine: the memtable/version
//! half and the read-path merging/caching half, without the rest of a full
//! engine (no compaction policy, no SST byte layout, no WAL framing, no
//! encryption or backup).
//!
//! ##### NOTE
//!
//! > This crate only implements three subsystems of an LSM-tree storage
//! > engine: multi-version memtable lifecycle and flush installation, a
//! > range-tombstone-aware multi-source merging iterator, and a tiered
//! > block cache. Compaction, the on-disk segment format, write-ahead
//! > logging, and encryption are out of scope — see each module's
//! > Non-goals.
//!
//! ##### About
//!
//! - [`memtable::Memtable`] is a single mutable/sealed write buffer with its
//!   own unfragmented-then-fragmented range-tombstone set and a flush state
//!   machine (`Mutable -> Immutable -> FlushInProgress -> FlushCompleted`,
//!   with rollback on failure).
//! - [`memtable_list::MemTableList`] holds the immutable, refcounted,
//!   copy-on-write [`memtable_list::MemTableListVersion`] snapshot of all
//!   not-yet-flushed (and recently-flushed) memtables.
//! - [`flush_installer::FlushInstaller`] serializes concurrent flush
//!   completions into memtable-creation order before they reach the
//!   manifest.
//! - [`range_tombstone::fragmenter::Fragmenter`] turns an unordered,
//!   possibly-overlapping set of range tombstones into a queryable
//!   [`range_tombstone::fragmenter::FragmentedTombstoneList`];
//!   [`range_tombstone::truncated_iter::TruncatedRangeDelIterator`] bounds
//!   one to a single sorted run's file range.
//! - [`merge::merging_iterator::MergingIterator`] merges multiple sorted
//!   children (newest level first) with range-tombstone-aware cascading
//!   seeks and visibility filtering.
//! - [`cache::lru::ShardedLruCache`], [`cache::compressed::CompressedSecondaryCache`],
//!   and [`cache::nvm::NvmSecondaryCache`] are the three tiers
//!   [`cache::tiered::TieredCache`] composes under a single three-queue
//!   admission policy.
//!
//! Byte-exact on-disk formats, the comparator's exact ordering beyond the
//! provided [`comparator::BytewiseComparator`], and WAL/manifest framing are
//! all the embedding application's responsibility; this crate only pins
//! down the call contracts in [`external`].

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod comparator;
pub mod config;
pub mod error;
pub mod external;
pub mod flush_installer;
pub mod key;
pub mod memtable;
pub mod memtable_list;
pub mod merge;
pub mod range_tombstone;
mod slice;
pub mod telemetry;

pub use cache::{Cache, CacheEntry, CacheHelper, CacheValue, Handle, Priority};
pub use comparator::{BytewiseComparator, UserComparator};
pub use error::{Error, Result};
pub use flush_installer::{CommitBatch, DropState, FlushInstaller, ManifestSink};
pub use key::{InternalKey, SeqNo, UserKey, UserValue, ValueType, MAX_SEQUENCE_NUMBER};
pub use memtable::{EditRecord, FileMetadata, Memtable, MemtableId};
pub use memtable_list::{LookupResult, MemTableList, MemTableListVersion};
pub use merge::{ChildHandle, InternalIterator, Level, MergingIterator};
pub use range_tombstone::{FragmentedTombstoneList, Fragmenter, RangeTombstone, TruncatedRangeDelIterator};
pub use slice::Slice;
pub use telemetry::{AtomicMetrics, NoopTelemetrySink, TelemetrySink};
