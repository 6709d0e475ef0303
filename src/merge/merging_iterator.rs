// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! N-way merging iterator with range-tombstone-aware cascading seek.
//!
//! Levels are ordered newest (0) to oldest (N-1), matching the order sorted
//! runs are consulted in: the memtable list's newest memtable is level 0,
//! the oldest sorted run on disk is level N-1.

use super::InternalIterator;
use crate::key::{InternalKey, MAX_SEQUENCE_NUMBER};
use crate::range_tombstone::TruncatedRangeDelIterator;
use crate::{Error, Result, SeqNo, UserValue};

/// One sorted run: its child iterator and, if the run carries range
/// deletions, the truncated tombstone iterator bounding them to its range.
pub struct Level {
    pub child: Box<dyn InternalIterator + Send>,
    pub tombstones: Option<TruncatedRangeDelIterator>,
}

impl Level {
    #[must_use]
    pub fn new(child: Box<dyn InternalIterator + Send>) -> Self {
        Self {
            child,
            tombstones: None,
        }
    }

    #[must_use]
    pub fn with_tombstones(
        child: Box<dyn InternalIterator + Send>,
        tombstones: TruncatedRangeDelIterator,
    ) -> Self {
        Self {
            child,
            tombstones: Some(tombstones),
        }
    }
}

/// Opaque reference to one of the merging iterator's levels, per the
/// level-indexed bookkeeping `GetChildIndex` performs in the source this was
/// distilled from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildHandle(usize);

impl ChildHandle {
    #[must_use]
    pub fn new(level: usize) -> Self {
        Self(level)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HeapItem {
    level: usize,
    key: InternalKey,
}

/// Maintains a forward min-heap and a lazily built backward max-heap over `N`
/// child iterators, each optionally paired with a truncated range-del
/// iterator at the same level, per §4.3.
pub struct MergingIterator {
    levels: Vec<Level>,
    heap: Vec<HeapItem>,
    direction: Direction,
    read_seqno: SeqNo,
    status: Result<()>,
    initialized: bool,
}

impl MergingIterator {
    #[must_use]
    pub fn new(levels: Vec<Level>, read_seqno: SeqNo) -> Self {
        Self {
            levels,
            heap: Vec::new(),
            direction: Direction::Forward,
            read_seqno,
            status: Ok(()),
            initialized: false,
        }
    }

    /// Identifies the level a [`ChildHandle`] refers to.
    #[must_use]
    pub fn level_of(&self, handle: ChildHandle) -> usize {
        handle.0
    }

    fn capture_status(&mut self, level: usize) -> bool {
        let result = self.levels[level].child.status();
        if let Err(e) = result {
            self.status = Err(e);
            self.heap.clear();
            false
        } else {
            true
        }
    }

    fn heap_push_if_valid(&mut self, level: usize) {
        if self.levels[level].child.valid() {
            let key = self.levels[level].child.key().clone();
            self.heap.push(HeapItem { level, key });
        }
    }

    fn pop_min(&mut self) -> Option<HeapItem> {
        let (idx, _) = self
            .heap
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.key.cmp(&b.1.key))?;
        Some(self.heap.swap_remove(idx))
    }

    fn pop_max(&mut self) -> Option<HeapItem> {
        let (idx, _) = self
            .heap
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.key.cmp(&b.1.key))?;
        Some(self.heap.swap_remove(idx))
    }

    fn peek_min(&self) -> Option<&HeapItem> {
        self.heap.iter().min_by(|a, b| a.key.cmp(&b.key))
    }

    /// Cascading seek descending through levels `start..levels.len()`: seeks
    /// each child to `current_search_key`, and if a tombstone at that level
    /// covers it, jumps `current_search_key` to `(tombstone.end_key,
    /// kMaxSequence)` before continuing to the next (older) level. Per §4.3.
    fn cascading_seek(&mut self, start: usize, mut current_search_key: InternalKey) -> Result<()> {
        for level in start..self.levels.len() {
            self.levels[level].child.seek(&current_search_key)?;
            if !self.capture_status(level) {
                return self.status.clone_err();
            }

            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek(current_search_key.user_key.as_ref());
                if ts.covers_probe(current_search_key.user_key.as_ref(), self.read_seqno) {
                    let end = ts.end_key();
                    current_search_key =
                        InternalKey::new(end.user_key, MAX_SEQUENCE_NUMBER, crate::key::ValueType::Put);
                }
            }
        }
        Ok(())
    }

    /// Backward mirror of [`Self::cascading_seek`]: seeks each child to
    /// `current_search_key` via `seek_for_prev`, and if a tombstone at that
    /// level covers it, jumps `current_search_key` to `(tombstone.start_key,
    /// MAX_SEQUENCE_NUMBER)` before continuing to the next (older) level.
    ///
    /// `MAX_SEQUENCE_NUMBER` makes the jump key sort *before* every real
    /// entry sharing `start_key`'s user key (ties break on `Reverse(seqno)`,
    /// so the highest seqno sorts first), so `seek_for_prev` on it lands on
    /// the last entry strictly before the tombstone's (inclusive) start
    /// rather than back on a still-covered entry at the start key itself.
    fn cascading_seek_for_prev(
        &mut self,
        start: usize,
        mut current_search_key: InternalKey,
    ) -> Result<()> {
        for level in start..self.levels.len() {
            self.levels[level].child.seek_for_prev(&current_search_key)?;
            if !self.capture_status(level) {
                return self.status.clone_err();
            }

            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek_for_prev(current_search_key.user_key.as_ref());
                if ts.covers_probe(current_search_key.user_key.as_ref(), self.read_seqno) {
                    let start_key = ts.start_key();
                    current_search_key = InternalKey::new(
                        start_key.user_key,
                        MAX_SEQUENCE_NUMBER,
                        crate::key::ValueType::Put,
                    );
                }
            }
        }
        Ok(())
    }

    /// Rebuilds heap entries for levels `[start, levels.len())`, leaving
    /// entries for earlier levels untouched.
    fn resync_heap_from(&mut self, start: usize) {
        self.heap.retain(|item| item.level < start);
        for level in start..self.levels.len() {
            self.heap_push_if_valid(level);
        }
    }

    /// Seeks to the first key `>= target`, applying cascading tombstone
    /// skips, then filters the primed heap for visibility.
    pub fn seek(&mut self, target: &InternalKey) -> Result<()> {
        self.status = Ok(());
        self.direction = Direction::Forward;
        self.heap.clear();
        self.initialized = true;

        self.cascading_seek(0, target.clone())?;
        self.resync_heap_from(0);
        self.skip_covered_forward()
    }

    /// Seeks to the last key `<= target`. Symmetric to [`Self::seek`].
    pub fn seek_for_prev(&mut self, target: &InternalKey) -> Result<()> {
        self.status = Ok(());
        self.direction = Direction::Backward;
        self.heap.clear();
        self.initialized = true;

        for level in 0..self.levels.len() {
            self.levels[level].child.seek_for_prev(target)?;
            if !self.capture_status(level) {
                return Ok(());
            }
            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek_for_prev(target.user_key.as_ref());
            }
            self.heap_push_if_valid(level);
        }

        self.skip_covered_backward()
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.status = Ok(());
        self.direction = Direction::Forward;
        self.heap.clear();
        self.initialized = true;

        for level in 0..self.levels.len() {
            self.levels[level].child.seek_to_first()?;
            if !self.capture_status(level) {
                return Ok(());
            }
            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek_to_first();
            }
            self.heap_push_if_valid(level);
        }

        self.skip_covered_forward()
    }

    pub fn seek_to_last(&mut self) -> Result<()> {
        self.status = Ok(());
        self.direction = Direction::Backward;
        self.heap.clear();
        self.initialized = true;

        for level in 0..self.levels.len() {
            self.levels[level].child.seek_to_last()?;
            if !self.capture_status(level) {
                return Ok(());
            }
            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek_to_last();
            }
            self.heap_push_if_valid(level);
        }

        self.skip_covered_backward()
    }

    /// Flips to forward traversal by reseeking at the current key, per §4.3's
    /// "direction flips ... rebuild the opposite heap".
    fn flip_to_forward(&mut self) -> Result<()> {
        let key = self.key().clone();
        self.direction = Direction::Forward;
        self.heap.clear();
        self.cascading_seek(0, key)?;
        self.resync_heap_from(0);
        self.skip_covered_forward()
    }

    fn flip_to_backward(&mut self) -> Result<()> {
        let key = self.key().clone();
        self.direction = Direction::Backward;
        self.heap.clear();
        for level in 0..self.levels.len() {
            self.levels[level].child.seek_for_prev(&key)?;
            if !self.capture_status(level) {
                return Ok(());
            }
            if let Some(ts) = &mut self.levels[level].tombstones {
                ts.seek_for_prev(key.user_key.as_ref());
            }
            self.heap_push_if_valid(level);
        }
        self.skip_covered_backward()
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.initialized {
            self.seek_to_first()?;
            return Ok(());
        }
        if self.direction == Direction::Backward {
            return self.flip_to_forward();
        }

        if let Some(top) = self.pop_min() {
            self.levels[top.level].child.next()?;
            if !self.capture_status(top.level) {
                return Ok(());
            }
            self.heap_push_if_valid(top.level);
        }

        self.skip_covered_forward()
    }

    pub fn prev(&mut self) -> Result<()> {
        if !self.initialized {
            self.seek_to_last()?;
            return Ok(());
        }
        if self.direction == Direction::Forward {
            return self.flip_to_backward();
        }

        if let Some(top) = self.pop_max() {
            self.levels[top.level].child.prev()?;
            if !self.capture_status(top.level) {
                return Ok(());
            }
            self.heap_push_if_valid(top.level);
        }

        self.skip_covered_backward()
    }

    /// Per §4.3's visibility filtering: repeatedly inspects the heap top and
    /// either advances past a sentinel, advances past a directly-covered
    /// entry, or performs a nested cascading seek when a shallower level's
    /// tombstone covers the top.
    fn skip_covered_forward(&mut self) -> Result<()> {
        loop {
            let Some(top) = self.peek_min() else {
                return Ok(());
            };

            if top.key.is_sentinel() {
                let level = top.level;
                self.levels[level].child.next()?;
                if !self.capture_status(level) {
                    return Ok(());
                }
                self.pop_min();
                self.heap_push_if_valid(level);
                continue;
            }

            let top_level = top.level;
            let top_key = top.key.clone();

            let mut covering_level = None;
            for level in 0..=top_level {
                if let Some(ts) = &self.levels[level].tombstones {
                    if ts.covers(top_key.user_key.as_ref(), top_key.seqno, self.read_seqno) {
                        covering_level = Some(level);
                        break;
                    }
                }
            }

            match covering_level {
                None => return Ok(()),
                Some(level) if level == top_level => {
                    self.levels[level].child.next()?;
                    if !self.capture_status(level) {
                        return Ok(());
                    }
                    self.pop_min();
                    self.heap_push_if_valid(level);
                }
                Some(level) => {
                    let end_key = self.levels[level]
                        .tombstones
                        .as_ref()
                        .expect("covering_level implies tombstones present")
                        .end_key();
                    let search_key = InternalKey::new(
                        end_key.user_key,
                        MAX_SEQUENCE_NUMBER,
                        crate::key::ValueType::Put,
                    );
                    self.cascading_seek(level + 1, search_key)?;
                    self.resync_heap_from(level + 1);
                }
            }
        }
    }

    fn skip_covered_backward(&mut self) -> Result<()> {
        loop {
            let Some((idx, _)) = self
                .heap
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.key.cmp(&b.1.key))
            else {
                return Ok(());
            };
            let top = self.heap[idx].clone();

            if top.key.is_sentinel() {
                self.levels[top.level].child.prev()?;
                if !self.capture_status(top.level) {
                    return Ok(());
                }
                self.heap.swap_remove(idx);
                self.heap_push_if_valid(top.level);
                continue;
            }

            let mut covering_level = None;
            for level in 0..=top.level {
                if let Some(ts) = &self.levels[level].tombstones {
                    if ts.covers(top.key.user_key.as_ref(), top.key.seqno, self.read_seqno) {
                        covering_level = Some(level);
                        break;
                    }
                }
            }

            match covering_level {
                None => return Ok(()),
                Some(level) if level == top.level => {
                    self.levels[level].child.prev()?;
                    if !self.capture_status(level) {
                        return Ok(());
                    }
                    self.heap.swap_remove(idx);
                    self.heap_push_if_valid(level);
                }
                Some(level) => {
                    // A shallower level's tombstone covers `top`; re-seek
                    // `top.level` (and anything deeper) backward from just
                    // before the tombstone's start, mirroring the forward
                    // cascading seek in `skip_covered_forward`, instead of
                    // simply dropping `top.level` from the heap.
                    let start_key = self.levels[level]
                        .tombstones
                        .as_ref()
                        .expect("covering_level implies tombstones present")
                        .start_key();
                    let search_key = InternalKey::new(
                        start_key.user_key,
                        MAX_SEQUENCE_NUMBER,
                        crate::key::ValueType::Put,
                    );
                    self.heap.swap_remove(idx);
                    self.cascading_seek_for_prev(top.level, search_key)?;
                    self.resync_heap_from(top.level);
                }
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.status.is_ok() && !self.heap.is_empty()
    }

    /// # Panics
    /// Panics if `!valid()`.
    #[must_use]
    pub fn key(&self) -> &InternalKey {
        let item = match self.direction {
            Direction::Forward => self.peek_min(),
            Direction::Backward => self.heap.iter().max_by(|a, b| a.key.cmp(&b.key)),
        };
        &item.expect("valid() must be checked before key()").key
    }

    /// # Panics
    /// Panics if `!valid()`.
    #[must_use]
    pub fn value(&self) -> &UserValue {
        let level = match self.direction {
            Direction::Forward => self.peek_min(),
            Direction::Backward => self.heap.iter().max_by(|a, b| a.key.cmp(&b.key)),
        }
        .expect("valid() must be checked before value()")
        .level;

        self.levels[level].child.value()
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone_err()
    }
}

// `crate::Result<()>` doesn't implement `Clone` through `std::io::Error`;
// this narrows to what `MergingIterator` actually needs to hand back.
trait CloneErr {
    fn clone_err(&self) -> Result<()>;
}

impl CloneErr for Result<()> {
    fn clone_err(&self) -> Result<()> {
        match self {
            Ok(()) => Ok(()),
            Err(e) => Err(match e {
                Error::Io(io) => Error::Io(std::io::Error::new(io.kind(), io.to_string())),
                Error::Corruption(s) => Error::Corruption(s.clone()),
                Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
                Error::MergeInProgress => Error::MergeInProgress,
                Error::Incomplete => Error::Incomplete,
                Error::TryAgain => Error::TryAgain,
                Error::NotSupported(s) => Error::NotSupported(s.clone()),
                Error::Busy => Error::Busy,
                Error::ColumnFamilyDropped => Error::ColumnFamilyDropped,
            }),
        }
    }
}
