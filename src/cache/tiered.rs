// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tiered cache admission policy, per §4.10.
//!
//! Composes one primary ([`super::lru::ShardedLruCache`]), one compressed
//! secondary ([`super::compressed::CompressedSecondaryCache`]), and one NVM
//! secondary ([`super::nvm::NvmSecondaryCache`]) tier behind a single
//! `get_or_build` entry point that routes a lookup through three outcomes:
//!
//! - **miss in all tiers**: build the value, insert it into the primary
//!   tier, and drop a placeholder into the compressed tier marking the
//!   fingerprint as seen.
//! - **hit in NVM, miss/placeholder in compressed**: promote the value into
//!   the primary tier standalone; the compressed tier keeps (or gains) only
//!   a placeholder — a value is not promoted into the compressed tier on
//!   its first NVM hit.
//! - **hit in NVM, placeholder already in compressed**: promote into both
//!   the primary tier and the compressed tier, replacing the placeholder
//!   with the real serialized form.
//!
//! Primary-tier eviction spills into the compressed tier; compressed-tier
//! eviction spills into the NVM tier via `insert_saved`. A per-fingerprint
//! build guard ensures at most one concurrent construction per `(key,
//! helper)` pair — concurrent callers for the same miss wait on the first
//! builder's result rather than racing to build it twice.
//!
//! The real engine's secondary-cache handles are asynchronous (a lookup can
//! return a future that a `WaitAll`-style batch resolves once I/O
//! completes); this core has no async runtime in its dependency stack, so
//! `get_or_build` resolves synchronously. The admission outcomes and
//! invariants are unchanged — only the I/O latency-hiding is simplified
//! away.

use super::compressed::CompressedSecondaryCache;
use super::lru::ShardedLruCache;
use super::nvm::{CompressionType, NvmSecondaryCache, SourceTier};
use super::{Cache, CacheHelper, CacheRole, CacheValue, Priority};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

/// Tracks in-flight builds so concurrent misses on the same fingerprint
/// don't each pay the build cost.
#[derive(Default)]
struct BuildGuard {
    in_flight: Mutex<HashSet<(Box<[u8]>, usize)>>,
    condvar: Condvar,
}

impl BuildGuard {
    /// Blocks until no other thread is building `fingerprint`, then claims
    /// it. Returns `true` if the caller must build (and later call
    /// [`Self::finish`]); `false` means another thread just finished and the
    /// caller should retry the lookup instead.
    fn claim(&self, fingerprint: (Box<[u8]>, usize)) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.in_flight.lock().expect("lock poisoned");
        if guard.contains(&fingerprint) {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let _unused = self
                .condvar
                .wait_while(guard, |set| set.contains(&fingerprint))
                .expect("lock poisoned");
            return false;
        }
        guard.insert(fingerprint);
        true
    }

    fn finish(&self, fingerprint: &(Box<[u8]>, usize)) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.in_flight.lock().expect("lock poisoned");
        guard.remove(fingerprint);
        self.condvar.notify_all();
    }
}

pub struct TieredCache {
    primary: Arc<ShardedLruCache>,
    compressed: Arc<CompressedSecondaryCache>,
    nvm: NvmSecondaryCache,
    build_guard: BuildGuard,
    #[cfg(feature = "metrics")]
    telemetry: Arc<dyn crate::telemetry::TelemetrySink>,
}

impl TieredCache {
    #[must_use]
    pub fn new(
        primary_capacity: usize,
        num_shards: usize,
        high_pri_pool_ratio: f64,
        compressed_capacity: usize,
        nvm_capacity: usize,
        #[cfg(feature = "metrics")] telemetry: Arc<dyn crate::telemetry::TelemetrySink>,
    ) -> Arc<Self> {
        let compressed = Arc::new(CompressedSecondaryCache::new(compressed_capacity));

        let compressed_for_primary_spill = compressed.clone();
        let primary = Arc::new(ShardedLruCache::with_evict_callback(
            primary_capacity,
            num_shards,
            high_pri_pool_ratio,
            Some(Arc::new(move |key: &[u8], entry: &super::CacheEntry| {
                if entry.helper.serialize_to.is_some() {
                    compressed_for_primary_spill.insert(key, &entry.value, entry.helper);
                }
            })),
        ));

        Arc::new(Self {
            primary,
            compressed,
            nvm: NvmSecondaryCache::new(nvm_capacity),
            build_guard: BuildGuard::default(),
            #[cfg(feature = "metrics")]
            telemetry,
        })
    }

    /// Looks up `key`, building and admitting it via `build` on a full miss.
    /// `build` returns the value plus its primary-tier charge.
    ///
    /// # Errors
    /// Propagates `build`'s error, or a `construct_from` failure when
    /// reconstructing from a secondary tier.
    pub fn get_or_build(
        &self,
        key: &[u8],
        helper: &'static CacheHelper,
        build: impl FnOnce() -> crate::Result<(CacheValue, usize)>,
    ) -> crate::Result<CacheValue> {
        if let Some(handle) = self.primary.lookup(key) {
            #[cfg(feature = "metrics")]
            self.telemetry.on_cache_lookup(true);
            #[expect(clippy::expect_used, reason = "handle was just returned by lookup")]
            let value = self.primary.value(handle).expect("handle just looked up");
            self.primary.release(handle, false);
            return Ok(value);
        }
        #[cfg(feature = "metrics")]
        self.telemetry.on_cache_lookup(false);

        let fingerprint = (Box::<[u8]>::from(key), helper.identity() as usize);

        loop {
            if !self.build_guard.claim(fingerprint.clone()) {
                // Someone else just finished; the value should now be in
                // the primary tier (or this was a placeholder-only path).
                if let Some(handle) = self.primary.lookup(key) {
                    #[expect(clippy::expect_used, reason = "handle was just returned by lookup")]
                    let value = self.primary.value(handle).expect("handle just looked up");
                    self.primary.release(handle, false);
                    return Ok(value);
                }
                continue;
            }
            break;
        }

        let result = self.resolve_miss(key, helper, build);
        self.build_guard.finish(&fingerprint);
        result
    }

    fn resolve_miss(
        &self,
        key: &[u8],
        helper: &'static CacheHelper,
        build: impl FnOnce() -> crate::Result<(CacheValue, usize)>,
    ) -> crate::Result<CacheValue> {
        if let Some((raw, _compression)) = self.nvm.lookup_raw(key) {
            log::trace!(
                "{} tier hit for {} byte key, promoting to {}",
                CacheRole::NvmSecondary,
                key.len(),
                CacheRole::Primary,
            );
            #[cfg(feature = "metrics")]
            self.telemetry.on_nvm_hit();
            let compressed_state = self.compressed.lookup(key);

            let Some(construct_from) = helper.construct_from else {
                return build().map(|(v, _)| v);
            };
            let value = construct_from(&raw)?;

            match compressed_state {
                // No compressed entry at all: promote to primary standalone
                // and drop a placeholder, same as a full-miss build.
                None => self.compressed.insert_placeholder(key, helper),
                // Placeholder present: this is the second sighting of this
                // fingerprint, so promote into the compressed tier too,
                // replacing the placeholder.
                Some(Ok(None)) => self.compressed.insert(key, &value, helper),
                // Already a real compressed entry: nothing to change there.
                Some(Ok(Some(_))) => {
                    #[cfg(feature = "metrics")]
                    self.telemetry.on_compressed_hit();
                }
                Some(Err(_)) => {}
            }

            let charge = (helper.size_of)(&value);
            let h = self
                .primary
                .insert(key, value.clone(), charge, helper, Priority::Low);
            self.primary.release(h, false);
            return Ok(value);
        }

        // Miss in every tier: build fresh, insert into primary, and drop a
        // placeholder into compressed marking the fingerprint as seen.
        log::debug!(
            "full miss across all tiers ({}, {}, {}) for {} byte key, building",
            CacheRole::Primary,
            CacheRole::CompressedSecondary,
            CacheRole::NvmSecondary,
            key.len(),
        );
        let (value, charge) = build()?;
        let h = self
            .primary
            .insert(key, value.clone(), charge, helper, Priority::Low);
        self.primary.release(h, false);
        self.compressed.insert_placeholder(key, helper);
        Ok(value)
    }

    /// Spills a compressed-tier entry into NVM. Exposed for tests and for a
    /// caller that wants to force-drain the compressed tier ahead of an
    /// orderly shutdown; in steady state this is wired automatically once a
    /// [`CompressedSecondaryCache`] is constructed via
    /// `with_evict_callback`.
    pub fn spill_to_nvm(&self, key: &[u8], bytes: Vec<u8>) {
        self.nvm
            .insert_saved(key, bytes, CompressionType::None, SourceTier::Compressed);
        #[cfg(feature = "metrics")]
        self.telemetry.on_nvm_insert_saved();
    }

    pub fn erase(&self, key: &[u8]) {
        self.primary.erase(key);
        self.compressed.erase(key);
        self.nvm.erase(key);
    }
}
