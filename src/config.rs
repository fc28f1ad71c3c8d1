// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt::Formatter;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the storage engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// Filesystem path to the SQLite database file.
    pub db_path: PathBuf,

    /// Pending-batch flush threshold inside a write-tx. `0` flushes on
    /// every upsert/delete.
    pub max_batch_size: usize,

    /// Number of most-recent ledgers to retain in `ledger_close_meta`.
    pub ledger_retention_window: u32,

    /// Commit count between `wal_checkpoint(TRUNCATE)` calls.
    pub wal_checkpoint_interval: u64,

    /// Upper bound on concurrently open read connections.
    pub reader_pool_max_connections: u32,

    /// SQLite busy-handler timeout for the writer connection, in
    /// milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledger.sqlite3"),
            max_batch_size: 1000,
            ledger_retention_window: 17280,
            wal_checkpoint_interval: 1000,
            reader_pool_max_connections: 16,
            busy_timeout_ms: 10_000,
        }
    }
}

impl std::fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "db_path: {}, \
             max_batch_size: {}, \
             ledger_retention_window: {}, \
             wal_checkpoint_interval: {}, \
             reader_pool_max_connections: {}, \
             busy_timeout_ms: {}",
            self.db_path.display(),
            self.max_batch_size,
            self.ledger_retention_window,
            self.wal_checkpoint_interval,
            self.reader_pool_max_connections,
            self.busy_timeout_ms,
        )
    }
}
