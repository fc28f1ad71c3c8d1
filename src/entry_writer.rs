// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Batched upsert/delete of ledger entries inside a write-tx.

use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::cache::WriteStaging;
use crate::codec::{self, LedgerKey};
use crate::error::Result;

#[derive(Clone)]
enum Pending {
    Upsert(Vec<u8>),
    Delete,
}

/// Collects upserts/deletes for the lifetime of a single write-tx and
/// flushes them to the DB (and stages the corresponding cache updates) once
/// the batch reaches `max_batch_size`, or when the write-tx commits.
pub struct EntryWriter {
    pending: HashMap<LedgerKey, Pending>,
    max_batch_size: usize,
    staging: WriteStaging,
}

impl EntryWriter {
    pub fn new(max_batch_size: usize, staging: WriteStaging) -> Self {
        Self {
            pending: HashMap::new(),
            max_batch_size,
            staging,
        }
    }

    /// Stages an upsert of `entry`, deriving its key. Flushes immediately
    /// if the pending batch has reached `max_batch_size`.
    pub fn upsert(&mut self, conn: &Connection, entry: Vec<u8>) -> Result<()> {
        let key = codec::key_of(&entry)?;
        self.pending.insert(key, Pending::Upsert(entry));
        self.flush_if_full(conn)
    }

    /// Stages a delete of `key`. Flushes immediately if the pending batch
    /// has reached `max_batch_size`.
    pub fn delete(&mut self, conn: &Connection, key: LedgerKey) -> Result<()> {
        self.pending.insert(key, Pending::Delete);
        self.flush_if_full(conn)
    }

    fn flush_if_full(&mut self, conn: &Connection) -> Result<()> {
        // `max_batch_size == 0` flushes on every upsert/delete: `.max(1)`
        // makes a single pending item already "full".
        let threshold = self.max_batch_size.max(1);
        if self.pending.len() >= threshold {
            self.flush(conn)?;
        }
        Ok(())
    }

    /// Flushes the pending batch: at most one multi-row `REPLACE` and at
    /// most one multi-row `DELETE`. On success, stages the corresponding
    /// cache updates and clears the batch entry-by-entry so its backing
    /// map retains capacity across flushes.
    pub fn flush(&mut self, conn: &Connection) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for (key, value) in &self.pending {
            match value {
                Pending::Upsert(entry) => upserts.push((key.clone(), entry.clone())),
                Pending::Delete => deletes.push(key.clone()),
            }
        }

        debug!(
            upserts = upserts.len(),
            deletes = deletes.len(),
            "flushing ledger-entry batch"
        );

        if !upserts.is_empty() {
            let placeholders: Vec<String> = upserts.iter().map(|_| "(?, ?)".to_string()).collect();
            let sql = format!(
                "REPLACE INTO ledger_entries (key, entry) VALUES {}",
                placeholders.join(", ")
            );
            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(upserts.len() * 2);
            for (key, entry) in &upserts {
                params.push(key);
                params.push(entry);
            }
            conn.execute(&sql, params_from_iter(params))
                .map_err(|e| crate::error::StoreError::backend("replace ledger entries", e))?;
        }

        if !deletes.is_empty() {
            let placeholders: Vec<String> = deletes.iter().map(|_| "?".to_string()).collect();
            let sql = format!(
                "DELETE FROM ledger_entries WHERE key IN ({})",
                placeholders.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> =
                deletes.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
            conn.execute(&sql, params_from_iter(params))
                .map_err(|e| crate::error::StoreError::backend("delete ledger entries", e))?;
        }

        for (key, entry) in &upserts {
            if codec::is_config_setting(entry) {
                self.staging.stage_upsert(key.clone(), entry.clone());
            }
        }
        for key in &deletes {
            self.staging.stage_tombstone(key.clone());
        }

        // Clear entry-by-entry so the map's bucket capacity survives the
        // flush, instead of reassigning a fresh (empty-capacity) map.
        let keys: Vec<LedgerKey> = self.pending.keys().cloned().collect();
        for key in keys {
            self.pending.remove(&key);
        }

        Ok(())
    }

    /// Consumes the writer, returning the accumulated cache staging for
    /// the caller (the write-tx committer) to merge.
    pub fn into_staging(self) -> WriteStaging {
        self.staging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TransactionalCache;
    use crate::codec::{encode_entry, ENTRY_KIND_CONFIG_SETTING};
    use crate::db::migrations;

    fn conn() -> Connection {
        let mut c = Connection::open_in_memory().unwrap();
        migrations::run(&mut c).unwrap();
        c
    }

    #[test]
    fn flush_writes_upserts_and_deletes_in_one_round_trip_each() {
        let conn = conn();
        let cache = TransactionalCache::new();
        let mut writer = EntryWriter::new(1000, cache.new_write_staging(8));

        let e1 = encode_entry(ENTRY_KIND_CONFIG_SETTING, b"cfg/a", b"1");
        let e2 = encode_entry(0x02, b"acct/b", b"2");
        writer.upsert(&conn, e1.clone()).unwrap();
        writer.upsert(&conn, e2.clone()).unwrap();
        writer.flush(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        writer.delete(&conn, b"acct/b".to_vec()).unwrap();
        writer.flush(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let staging = writer.into_staging();
        assert!(!staging.is_empty());
    }

    #[test]
    fn max_batch_size_zero_flushes_on_every_op() {
        let conn = conn();
        let cache = TransactionalCache::new();
        let mut writer = EntryWriter::new(0, cache.new_write_staging(1));
        let e1 = encode_entry(0x02, b"acct/a", b"1");
        writer.upsert(&conn, e1).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledger_entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
