// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The typed cache layer: a tiny abstraction around a type-erased cache
//! where every cached value carries a **helper** describing how to measure,
//! serialize, and reconstruct it, per §4.6.
//!
//! Concrete tiers ([`crate::cache::lru`], [`crate::cache::compressed`],
//! [`crate::cache::nvm`]) and the [`crate::cache::tiered`] admission policy
//! build on the types defined here.

pub mod compressed;
pub mod lru;
pub mod nvm;
pub mod tiered;

use crate::Slice;
use std::any::Any;
use std::sync::Arc;

/// Relative eviction priority. Entries are only ever demoted from `High` to
/// `Low`, never promoted, per §4.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    High,
}

/// Which tier of [`crate::cache::tiered::TieredCache`] an entry or event
/// belongs to, distinct from [`Priority`]: a role names a storage tier, a
/// priority ranks eviction order within one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheRole {
    Primary,
    CompressedSecondary,
    NvmSecondary,
}

impl std::fmt::Display for CacheRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::CompressedSecondary => "compressed-secondary",
            Self::NvmSecondary => "nvm-secondary",
        })
    }
}

/// What a cached value actually holds.
///
/// Per §3's "cached values are either fully typed objects or raw byte
/// ranges, discriminated by helper" — `Bytes` covers the common block-cache
/// case; `Typed` lets a caller cache an already-parsed object when the cost
/// of reparsing on every hit isn't worth it.
#[derive(Clone)]
pub enum CacheValue {
    Bytes(Slice),
    Typed(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Slice> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Typed(_) => None,
        }
    }

    #[must_use]
    pub fn as_typed<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Typed(v) => v.downcast_ref::<T>(),
            Self::Bytes(_) => None,
        }
    }
}

/// A vtable-like record describing how to size, serialize, and reconstruct a
/// [`CacheValue`] without the cache itself knowing the concrete type.
///
/// Two `CacheHelper`s are the same helper iff they're the same static
/// instance (compared by pointer identity) — this is how a typed handle
/// downcasts safely, per §4.6.
pub struct CacheHelper {
    pub name: &'static str,
    pub size_of: fn(&CacheValue) -> usize,
    /// Compresses/encodes into the form a secondary tier stores.
    pub serialize_to: Option<fn(&CacheValue) -> Vec<u8>>,
    /// Reconstructs a value from a secondary tier's serialized form.
    pub construct_from: Option<fn(&[u8]) -> crate::Result<CacheValue>>,
}

impl CacheHelper {
    #[must_use]
    pub fn identity(&self) -> *const Self {
        std::ptr::from_ref(self)
    }
}

impl std::fmt::Debug for CacheHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHelper").field("name", &self.name).finish()
    }
}

/// `(key, value, charge, helper, refcount, priority)` per §3.
pub struct CacheEntry {
    pub value: CacheValue,
    pub charge: usize,
    pub helper: &'static CacheHelper,
    pub priority: Priority,
    pub refcount: usize,
}

/// A strong reference to a looked-up or inserted cache entry.
///
/// Holds one refcount; dropping it without calling [`Cache::release`] would
/// leak the count, so handles are always returned through `release` in this
/// core's API (no `Drop` impl performs it implicitly, matching the explicit
/// release-based ownership model the helper vtable is built around).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) u64);

/// The typed cache layer operations from §4.6.
pub trait Cache {
    /// Inserts `value` under `key`, returning a handle holding one strong ref.
    fn insert(
        &self,
        key: &[u8],
        value: CacheValue,
        charge: usize,
        helper: &'static CacheHelper,
        priority: Priority,
    ) -> Handle;

    /// Looks up `key`. Returns `None` on a miss.
    fn lookup(&self, key: &[u8]) -> Option<Handle>;

    /// Releases one strong ref on `handle`. If `erase_if_last_ref` and this
    /// was the last ref, the entry is removed instead of returning to the
    /// eviction list — used to expire placeholders.
    fn release(&self, handle: Handle, erase_if_last_ref: bool);

    /// Returns the value a handle points to, if the handle is still valid.
    fn value(&self, handle: Handle) -> Option<CacheValue>;

    /// Removes `key` outright, regardless of outstanding refs (it is simply
    /// unreachable by further lookups; existing handles remain valid until
    /// released).
    fn erase(&self, key: &[u8]);
}

/// An entry with zero payload marking "this fingerprint was recently looked
/// up", per §3's Tiered Cache Placeholder.
#[must_use]
pub fn placeholder_helper() -> &'static CacheHelper {
    static PLACEHOLDER: CacheHelper = CacheHelper {
        name: "lsm_core.placeholder",
        size_of: |_| 0,
        serialize_to: None,
        construct_from: None,
    };
    &PLACEHOLDER
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn cache_value_typed_roundtrip() {
        let v = CacheValue::Typed(Arc::new(42u32));
        assert_eq!(v.as_typed::<u32>(), Some(&42));
        assert_eq!(v.as_typed::<u64>(), None);
        assert!(v.as_bytes().is_none());
    }

    #[test]
    fn cache_value_bytes_roundtrip() {
        let v = CacheValue::Bytes(Slice::from("hello"));
        assert_eq!(v.as_bytes().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn helper_identity_is_pointer_equality() {
        let a = placeholder_helper();
        let b = placeholder_helper();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn cache_role_displays_as_tier_name() {
        assert_eq!(CacheRole::Primary.to_string(), "primary");
        assert_eq!(CacheRole::CompressedSecondary.to_string(), "compressed-secondary");
        assert_eq!(CacheRole::NvmSecondary.to_string(), "nvm-secondary");
    }
}
