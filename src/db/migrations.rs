// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Forward-only SQL migrations, run once at `Handle::open`.
//!
//! Versioning rides on SQLite's built-in `user_version` pragma rather than
//! a bespoke `schema_migrations` table: it's already transactionally
//! consistent with the rest of the file and needs no extra row.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Each entry is the full set of statements for one migration step, applied
/// inside a single transaction.
const MIGRATIONS: &[&[&str]] = &[
    // Migration 1: base schema.
    &[
        "CREATE TABLE ledger_entries (
            key BLOB PRIMARY KEY,
            entry BLOB NOT NULL
        )",
        "CREATE TABLE ledger_close_meta (
            sequence INTEGER PRIMARY KEY,
            meta BLOB NOT NULL
        )",
        "CREATE TABLE metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ],
];

/// Runs every migration whose index is >= the DB's current `user_version`.
pub fn run(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StoreError::backend("read user_version", e))?;
    let current = current.max(0) as usize;

    if current >= MIGRATIONS.len() {
        return Ok(());
    }

    for (idx, statements) in MIGRATIONS.iter().enumerate().skip(current) {
        info!(migration = idx + 1, "running ledger store migration");
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::backend("begin migration tx", e))?;
        for stmt in *statements {
            tx.execute_batch(stmt)
                .map_err(|e| StoreError::backend("apply migration statement", e))?;
        }
        tx.pragma_update(None, "user_version", (idx + 1) as i64)
            .map_err(|e| StoreError::backend("bump user_version", e))?;
        tx.commit()
            .map_err(|e| StoreError::backend("commit migration tx", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            tables,
            vec!["ledger_close_meta", "ledger_entries", "metadata"]
        );
    }
}
