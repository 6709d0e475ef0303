// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The `InternalIterator` capability set and the multi-source merging
//! iterator built on top of it.

mod merging_iterator;
mod vec_iter;

pub use merging_iterator::{ChildHandle, Level, MergingIterator};
pub use vec_iter::VecIterator;

use crate::key::InternalKey;
use crate::UserValue;

/// A single capability set shared by every child iterator the merging
/// iterator consumes, whether it wraps a memtable skiplist cursor or a table
/// reader's block iterator.
///
/// Per the design note replacing deep virtual-dispatch hierarchies: concrete
/// iterators implement this interface directly rather than inheriting from a
/// common base, so a table's specialized block iterator is just a struct
/// implementing `InternalIterator`, not a subclass of one.
pub trait InternalIterator {
    /// Positions at the first key `>= target`.
    fn seek(&mut self, target: &InternalKey) -> crate::Result<()>;

    /// Positions at the last key `<= target`.
    fn seek_for_prev(&mut self, target: &InternalKey) -> crate::Result<()>;

    /// Positions at the smallest key.
    fn seek_to_first(&mut self) -> crate::Result<()>;

    /// Positions at the largest key.
    fn seek_to_last(&mut self) -> crate::Result<()>;

    /// Advances to the next key in ascending order.
    fn next(&mut self) -> crate::Result<()>;

    /// Advances to the next key in descending order.
    fn prev(&mut self) -> crate::Result<()>;

    /// `true` if positioned on a real entry and no error has been recorded.
    fn valid(&self) -> bool;

    /// The key at the current position.
    ///
    /// # Panics
    /// May panic if called while `!valid()`.
    fn key(&self) -> &InternalKey;

    /// The value at the current position.
    ///
    /// # Panics
    /// May panic if called while `!valid()`.
    fn value(&self) -> &UserValue;

    /// The iterator's sticky status; once non-`Ok`, `valid()` must be `false`.
    fn status(&self) -> crate::Result<()>;
}
