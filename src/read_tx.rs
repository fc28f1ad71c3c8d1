// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A read-only transaction, optionally backed by a per-tx cache snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params_from_iter, OptionalExtension};
use tracing::debug;

use crate::cache::TransactionalCache;
use crate::codec::{self, LedgerKey};
use crate::db::Handle;
use crate::error::{Result, StoreError};

/// A per-tx memoization of lookups: `Some(entry)` for a hit, `None` for a
/// confirmed miss (a tombstone, in the vocabulary of the design notes) so a
/// repeated lookup of an absent key doesn't re-query the DB.
type Memo = HashMap<LedgerKey, Option<Vec<u8>>>;

pub struct ReadTx {
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    /// `Some` only for a cached read-tx. Seeded from the shared cache at
    /// `begin` time and grown by DB-fallback memoization thereafter.
    memo: Option<Memo>,
    cache: Option<Arc<TransactionalCache>>,
    latest_seq: Option<u32>,
    done: bool,
}

impl ReadTx {
    /// Begins a read-only transaction. If `cached`, the shared
    /// transactional cache's read lock is held across the DB `BEGIN` so
    /// the resulting snapshot and DB view are atomic with one another.
    pub fn begin(handle: &Handle, cached: bool) -> Result<Self> {
        if cached {
            let cache = handle.cache_arc();
            let (snapshot, conn_result) = cache.snapshot_with(|| Self::open_conn(handle));
            let conn = conn_result?;
            let memo: Memo = snapshot.into_iter().map(|(k, v)| (k, Some(v))).collect();
            Ok(Self {
                conn: Some(conn),
                memo: Some(memo),
                cache: Some(cache),
                latest_seq: None,
                done: false,
            })
        } else {
            let conn = Self::open_conn(handle)?;
            Ok(Self {
                conn: Some(conn),
                memo: None,
                cache: None,
                latest_seq: None,
                done: false,
            })
        }
    }

    fn open_conn(handle: &Handle) -> Result<PooledConnection<SqliteConnectionManager>> {
        let conn = handle.reader_connection()?;
        conn.execute_batch("BEGIN DEFERRED")
            .map_err(|e| StoreError::backend("begin read-tx", e))?;
        // SQLite doesn't actually pin a read snapshot until the first
        // statement that reads data; force that now so the snapshot is
        // taken at `begin` time, not at the caller's first real query.
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| StoreError::backend("pin read snapshot", e))?;
        Ok(conn)
    }

    fn conn(&self) -> Result<&PooledConnection<SqliteConnectionManager>> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::backend("read-tx", anyhow::anyhow!("transaction already closed")))
    }

    /// Looks up `keys`, preferring the per-tx memo / cache snapshot and
    /// falling back to one batched `SELECT` for whatever's left. An empty
    /// `keys` list returns an empty result with no DB query at all.
    pub fn get_entries(&mut self, keys: &[LedgerKey]) -> Result<Vec<(LedgerKey, Vec<u8>)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut missing = Vec::new();

        for key in keys {
            let hit = self.memo.as_ref().and_then(|m| m.get(key));
            match hit {
                Some(Some(entry)) => results.push((key.clone(), entry.clone())),
                Some(None) => {} // memoized miss: skip
                None => missing.push(key.clone()),
            }
        }

        if missing.is_empty() {
            return Ok(results);
        }

        let found = self.fetch_from_db(&missing)?;

        for key in &missing {
            match found.get(key) {
                Some(entry) => {
                    results.push((key.clone(), entry.clone()));
                    if let Some(memo) = self.memo.as_mut() {
                        memo.insert(key.clone(), Some(entry.clone()));
                    }
                    if codec::is_config_setting(entry) {
                        if let Some(cache) = &self.cache {
                            cache.insert_if_absent(key.clone(), entry.clone());
                        }
                    }
                }
                None => {
                    if let Some(memo) = self.memo.as_mut() {
                        memo.insert(key.clone(), None);
                    }
                }
            }
        }

        Ok(results)
    }

    fn fetch_from_db(&self, keys: &[LedgerKey]) -> Result<HashMap<LedgerKey, Vec<u8>>> {
        let conn = self.conn()?;
        let placeholders: Vec<&str> = keys.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT key, entry FROM ledger_entries WHERE key IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::backend("prepare get_entries", e))?;
        let params: Vec<&dyn rusqlite::ToSql> =
            keys.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let key: Vec<u8> = row.get(0)?;
                let entry: Vec<u8> = row.get(1)?;
                Ok((key, entry))
            })
            .map_err(|e| StoreError::backend("query get_entries", e))?;

        let mut found = HashMap::new();
        for row in rows {
            let (key, entry) = row.map_err(|e| StoreError::backend("read get_entries row", e))?;
            found.insert(key, entry);
        }
        debug!(
            requested = keys.len(),
            found = found.len(),
            first_key = ?keys.first().map(|k| hex::encode(k)),
            "get_entries DB fallback"
        );
        Ok(found)
    }

    /// Returns the latest committed ledger sequence, memoizing the result
    /// on success so repeated calls don't re-query.
    pub fn latest_ledger_sequence(&mut self) -> Result<u32> {
        if let Some(seq) = self.latest_seq {
            return Ok(seq);
        }
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'LatestLedgerSequence'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::backend("read latest sequence", e))?;

        let raw = value.ok_or(StoreError::EmptyDB)?;
        let seq: u32 = raw
            .parse()
            .map_err(|_| StoreError::CodecError(format!("invalid latest sequence value {raw:?}")))?;
        self.latest_seq = Some(seq);
        Ok(seq)
    }

    /// Releases the DB transaction via rollback. Read-only, so rollback is
    /// semantically a close. Idempotent.
    pub fn done(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(conn) = self.conn.take() {
            conn.execute_batch("ROLLBACK")
                .map_err(|e| StoreError::backend("close read-tx", e))?;
        }
        Ok(())
    }
}

impl Drop for ReadTx {
    fn drop(&mut self) {
        let _ = self.done();
    }
}
