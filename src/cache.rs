// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The process-wide transactional cache of config-setting ledger entries.
//!
//! A single reader/writer lock guards the shared map. Read-tx snapshot
//! creation holds the read lock across the DB read-transaction's `BEGIN`,
//! and write-tx commit holds the write lock across the DB `COMMIT`, so that
//! the happens-before edges required by the snapshot-isolation invariant
//! (see the crate-level docs) are enforced by lock scoping rather than by
//! any ad hoc bookkeeping.

use std::collections::HashMap;

use parking_lot::{RwLock, RwLockWriteGuard};

pub type CacheKey = Vec<u8>;
pub type CacheValue = Vec<u8>;
pub type CacheSnapshot = HashMap<CacheKey, CacheValue>;

/// One staged update inside a write-tx: either a new value or a tombstone.
#[derive(Debug, Clone)]
enum Staged {
    Value(CacheValue),
    Tombstone,
}

/// Pending cache updates collected by a write-tx, merged into the shared
/// cache at commit time.
#[derive(Debug, Default)]
pub struct WriteStaging {
    pending: HashMap<CacheKey, Staged>,
}

impl WriteStaging {
    fn with_capacity(est: usize) -> Self {
        Self {
            pending: HashMap::with_capacity(est),
        }
    }

    pub fn stage_upsert(&mut self, key: CacheKey, value: CacheValue) {
        self.pending.insert(key, Staged::Value(value));
    }

    pub fn stage_tombstone(&mut self, key: CacheKey) {
        self.pending.insert(key, Staged::Tombstone);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// The shared, process-wide cache.
#[derive(Default)]
pub struct TransactionalCache {
    inner: RwLock<CacheSnapshot>,
}

/// Holds the cache write lock across a write-tx's merge-then-DB-commit
/// sequence. Dropping the guard (after the DB commit has returned success)
/// is what publishes the merged entries to future readers.
pub struct CacheMergeGuard<'a> {
    guard: RwLockWriteGuard<'a, CacheSnapshot>,
}

impl<'a> CacheMergeGuard<'a> {
    pub fn apply(&mut self, staging: WriteStaging) {
        for (key, value) in staging.pending {
            match value {
                Staged::Value(v) => {
                    self.guard.insert(key, v);
                }
                Staged::Tombstone => {
                    self.guard.remove(&key);
                }
            }
        }
    }
}

impl TransactionalCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Captures a shallow copy of the cache and, while still holding the
    /// read lock, runs `during` (typically: begin the DB read-transaction).
    /// This gives the caller a snapshot that is guaranteed consistent with
    /// whatever DB view `during` establishes.
    pub fn snapshot_with<F, T>(&self, during: F) -> (CacheSnapshot, T)
    where
        F: FnOnce() -> T,
    {
        let guard = self.inner.read();
        let snapshot = guard.clone();
        let result = during();
        drop(guard);
        (snapshot, result)
    }

    pub fn new_write_staging(&self, est: usize) -> WriteStaging {
        WriteStaging::with_capacity(est)
    }

    /// Acquires the cache write lock for a write-tx commit. The returned
    /// guard must be held across the DB commit and dropped only after it
    /// succeeds.
    pub fn begin_merge(&self) -> CacheMergeGuard<'_> {
        CacheMergeGuard {
            guard: self.inner.write(),
        }
    }

    /// Insert-if-absent warm-up used by cached read-txs: a DB-fetched
    /// config-setting entry that the cache doesn't yet know about is
    /// inserted, but an existing (possibly newer) value is never
    /// overwritten.
    pub fn insert_if_absent(&self, key: CacheKey, value: CacheValue) {
        let mut guard = self.inner.write();
        guard.entry(key).or_insert(value);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_applies_upserts_and_tombstones() {
        let cache = TransactionalCache::new();
        let mut staging = cache.new_write_staging(2);
        staging.stage_upsert(b"k1".to_vec(), b"v1".to_vec());
        staging.stage_upsert(b"k2".to_vec(), b"v2".to_vec());
        cache.begin_merge().apply(staging);
        assert_eq!(cache.len(), 2);

        let mut staging = cache.new_write_staging(1);
        staging.stage_tombstone(b"k1".to_vec());
        cache.begin_merge().apply(staging);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_if_absent_never_overwrites() {
        let cache = TransactionalCache::new();
        cache.insert_if_absent(b"k".to_vec(), b"first".to_vec());
        cache.insert_if_absent(b"k".to_vec(), b"second".to_vec());
        let (snapshot, _) = cache.snapshot_with(|| ());
        assert_eq!(snapshot.get(b"k".as_slice()), Some(&b"first".to_vec()));
    }

    #[test]
    fn snapshot_is_a_shallow_copy_not_live() {
        let cache = TransactionalCache::new();
        let mut staging = cache.new_write_staging(1);
        staging.stage_upsert(b"k".to_vec(), b"v1".to_vec());
        cache.begin_merge().apply(staging);

        let (snapshot, _) = cache.snapshot_with(|| ());

        let mut staging = cache.new_write_staging(1);
        staging.stage_upsert(b"k".to_vec(), b"v2".to_vec());
        cache.begin_merge().apply(staging);

        assert_eq!(snapshot.get(b"k".as_slice()), Some(&b"v1".to_vec()));
    }
}
