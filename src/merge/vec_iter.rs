// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::InternalIterator;
use crate::key::InternalKey;
use crate::{Result, UserValue};

/// An `InternalIterator` over an in-memory sorted `Vec`.
///
/// Used by tests (and anywhere a child iterator needs to be stood in for a
/// real memtable or table reader).
pub struct VecIterator {
    items: Vec<(InternalKey, UserValue)>,
    pos: Option<usize>,
}

impl VecIterator {
    /// # Panics
    /// Panics in debug builds if `items` is not sorted ascending by key.
    #[must_use]
    pub fn new(mut items: Vec<(InternalKey, UserValue)>) -> Self {
        items.sort_by(|a, b| a.0.cmp(&b.0));
        debug_assert!(
            items.windows(2).all(|w| w[0].0 < w[1].0),
            "VecIterator requires distinct, sorted keys"
        );
        Self { items, pos: None }
    }
}

impl InternalIterator for VecIterator {
    fn seek(&mut self, target: &InternalKey) -> Result<()> {
        let idx = self.items.partition_point(|(k, _)| k < target);
        self.pos = if idx < self.items.len() { Some(idx) } else { None };
        Ok(())
    }

    fn seek_for_prev(&mut self, target: &InternalKey) -> Result<()> {
        let count = self.items.partition_point(|(k, _)| k <= target);
        self.pos = count.checked_sub(1);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.pos = if self.items.is_empty() { None } else { Some(0) };
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.pos = self.items.len().checked_sub(1);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.pos = match self.pos {
            Some(i) if i + 1 < self.items.len() => Some(i + 1),
            _ => None,
        };
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.pos = match self.pos {
            Some(i) if i > 0 => Some(i - 1),
            _ => None,
        };
        Ok(())
    }

    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn key(&self) -> &InternalKey {
        &self.items[self.pos.expect("valid() checked by caller")].0
    }

    fn value(&self) -> &UserValue {
        &self.items[self.pos.expect("valid() checked by caller")].1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
