// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A single read-write transaction: composes the entry-writer and
//! meta-writer and implements the strict commit protocol from the
//! crate-level design notes.

use parking_lot::MutexGuard;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::codec::LedgerKey;
use crate::db::Handle;
use crate::entry_writer::EntryWriter;
use crate::error::{Result, StoreError};
use crate::meta_writer::MetaWriter;

/// A read-write transaction. Only one can be open at a time -- `begin`
/// blocks on the handle's writer mutex until any prior `WriteTx` has
/// committed or rolled back, which is what enforces the at-most-one-writer
/// invariant.
pub struct WriteTx<'h> {
    handle: &'h Handle,
    guard: MutexGuard<'h, Option<Connection>>,
    entry_writer: Option<EntryWriter>,
    finished: bool,
}

impl<'h> WriteTx<'h> {
    pub fn begin(handle: &'h Handle) -> Result<Self> {
        let guard = handle.lock_writer();
        {
            let conn = guard
                .as_ref()
                .ok_or_else(|| StoreError::backend("begin write-tx", anyhow::anyhow!("store is closed")))?;
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| StoreError::backend("begin write-tx", e))?;
        }
        let staging = handle
            .cache()
            .new_write_staging(handle.config().max_batch_size.max(16));
        Ok(Self {
            handle,
            guard,
            entry_writer: Some(EntryWriter::new(handle.config().max_batch_size, staging)),
            finished: false,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.guard
            .as_ref()
            .ok_or_else(|| StoreError::backend("write-tx", anyhow::anyhow!("store is closed")))
    }

    /// Upserts a ledger entry, deriving its key.
    pub fn upsert(&mut self, entry: Vec<u8>) -> Result<()> {
        let conn = self
            .guard
            .as_ref()
            .ok_or_else(|| StoreError::backend("upsert", anyhow::anyhow!("store is closed")))?;
        self.entry_writer
            .as_mut()
            .expect("entry writer present until commit/rollback")
            .upsert(conn, entry)
    }

    /// Deletes a ledger entry by key.
    pub fn delete(&mut self, key: LedgerKey) -> Result<()> {
        let conn = self
            .guard
            .as_ref()
            .ok_or_else(|| StoreError::backend("delete", anyhow::anyhow!("store is closed")))?;
        self.entry_writer
            .as_mut()
            .expect("entry writer present until commit/rollback")
            .delete(conn, key)
    }

    /// Appends one ledger's close-meta. A collision on an existing
    /// sequence is an error.
    pub fn insert_meta(&mut self, sequence: u32, meta: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        MetaWriter::insert(conn, sequence, meta)
    }

    /// Commits entries, meta, retention trim, and the latest-sequence
    /// metadata atomically, following the strict order described in the
    /// crate-level design notes: flush → trim → metadata → cache merge →
    /// DB commit → periodic WAL checkpoint.
    pub fn commit(mut self, latest_seq: u32) -> Result<()> {
        self.finished = true;
        let retention_window = self.handle.config().ledger_retention_window;

        let conn = self
            .guard
            .as_ref()
            .ok_or_else(|| StoreError::backend("commit", anyhow::anyhow!("store is closed")))?;

        self.entry_writer
            .as_mut()
            .expect("entry writer present until commit/rollback")
            .flush(conn)?;

        MetaWriter::trim(conn, latest_seq, retention_window)?;

        conn.execute(
            "REPLACE INTO metadata (key, value) VALUES ('LatestLedgerSequence', ?1)",
            params![latest_seq.to_string()],
        )
        .map_err(|e| StoreError::backend("write latest sequence", e))?;

        let staging = self
            .entry_writer
            .take()
            .expect("entry writer present until commit/rollback")
            .into_staging();

        // Hold the cache write lock across the DB commit: readers that
        // capture a cache snapshot before this guard is dropped are
        // guaranteed to have opened their DB read-tx before this commit,
        // so they can never see merged cache entries without also seeing
        // the committed DB rows.
        let mut merge_guard = self.handle.cache().begin_merge();
        merge_guard.apply(staging);

        conn.execute_batch("COMMIT")
            .map_err(|e| StoreError::backend("commit write-tx", e))?;

        drop(merge_guard);

        debug!(latest_seq, "committed write-tx");
        self.handle.maybe_checkpoint(conn)?;

        Ok(())
    }

    /// Rolls back the transaction, discarding staged cache updates.
    /// Calling this after a successful `commit` is impossible (commit
    /// consumes `self`); calling it on a tx that was never committed is the
    /// only path, so rollback-after-commit is a no-op by construction.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if let Some(conn) = self.guard.as_ref() {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| StoreError::backend("rollback write-tx", e))?;
        }
        Ok(())
    }
}

impl<'h> Drop for WriteTx<'h> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(conn) = self.guard.as_ref() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    info!(error = %e, "rollback on drop failed (likely already rolled back)");
                }
            }
        }
    }
}
