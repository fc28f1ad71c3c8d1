// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Single-ledger lookup and full ascending-order scan over ledger-close-meta.

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::db::Handle;
use crate::error::{Result, StoreError};

/// A read-only view over `ledger_close_meta`. Unlike `ReadTx`, a meta
/// reader does not pin a long-lived transaction or a cache snapshot: each
/// call borrows a connection from the reader pool for its own duration.
pub struct MetaReader {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl MetaReader {
    pub fn new(handle: &Handle) -> Result<Self> {
        Ok(Self {
            conn: handle.reader_connection()?,
        })
    }

    /// Fetches the close-meta for `sequence`, if present.
    pub fn get_ledger(&self, sequence: u32) -> Result<Option<Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT meta FROM ledger_close_meta WHERE sequence = ?1")
            .map_err(|e| StoreError::backend("prepare get_ledger", e))?;
        let mut rows = stmt
            .query(params![sequence])
            .map_err(|e| StoreError::backend("query get_ledger", e))?;

        let first: Option<Vec<u8>> = match rows
            .next()
            .map_err(|e| StoreError::backend("step get_ledger", e))?
        {
            Some(row) => Some(
                row.get(0)
                    .map_err(|e| StoreError::backend("read meta column", e))?,
            ),
            None => None,
        };

        if rows
            .next()
            .map_err(|e| StoreError::backend("step get_ledger", e))?
            .is_some()
        {
            return Err(StoreError::InvariantViolation(format!(
                "multiple ledger_close_meta rows for sequence {sequence}"
            )));
        }

        Ok(first)
    }

    /// Streams every row in ascending sequence order, invoking `callback`
    /// for each `(sequence, meta)` pair. The scan aborts as soon as
    /// `callback` returns `Err`, propagating that error; rows are never
    /// buffered in full.
    pub fn stream_all<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(u32, &[u8]) -> Result<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT sequence, meta FROM ledger_close_meta ORDER BY sequence ASC")
            .map_err(|e| StoreError::backend("prepare stream_all", e))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| StoreError::backend("query stream_all", e))?;

        while let Some(row) = rows
            .next()
            .map_err(|e| StoreError::backend("step stream_all", e))?
        {
            let sequence: u32 = row
                .get(0)
                .map_err(|e| StoreError::backend("read sequence column", e))?;
            let meta: Vec<u8> = row
                .get(1)
                .map_err(|e| StoreError::backend("read meta column", e))?;
            callback(sequence, &meta)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::meta_writer::MetaWriter;

    fn handle() -> (tempfile::TempDir, Handle) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.db_path = dir.path().join("ledger.sqlite3");
        (dir, Handle::open(config).unwrap())
    }

    #[test]
    fn get_ledger_distinguishes_present_from_absent() {
        let (_dir, handle) = handle();
        {
            let mut guard = handle.lock_writer();
            let conn = guard.as_mut().unwrap();
            MetaWriter::insert(conn, 7, b"meta-7").unwrap();
        }
        let reader = MetaReader::new(&handle).unwrap();
        assert_eq!(reader.get_ledger(7).unwrap(), Some(b"meta-7".to_vec()));
        assert_eq!(reader.get_ledger(8).unwrap(), None);
    }

    #[test]
    fn stream_all_visits_in_ascending_order() {
        let (_dir, handle) = handle();
        {
            let mut guard = handle.lock_writer();
            let conn = guard.as_mut().unwrap();
            for seq in [3u32, 1, 2] {
                MetaWriter::insert(conn, seq, format!("m{seq}").as_bytes()).unwrap();
            }
        }
        let reader = MetaReader::new(&handle).unwrap();
        let mut seen = Vec::new();
        reader
            .stream_all(|seq, _meta| {
                seen.push(seq);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn stream_all_aborts_on_callback_error() {
        let (_dir, handle) = handle();
        {
            let mut guard = handle.lock_writer();
            let conn = guard.as_mut().unwrap();
            for seq in 1..=5u32 {
                MetaWriter::insert(conn, seq, b"m").unwrap();
            }
        }
        let reader = MetaReader::new(&handle).unwrap();
        let mut visited = 0;
        let result = reader.stream_all(|_seq, _meta| {
            visited += 1;
            if visited == 2 {
                Err(StoreError::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(visited, 2);
    }
}
