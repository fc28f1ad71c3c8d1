// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Opens the embedded SQLite database file and owns the writer connection
//! and the reader connection pool that everything else in the crate is
//! built on.

pub mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::info;

use crate::cache::TransactionalCache;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // The core checkpoints explicitly at commit time (see WriteTx::commit);
    // disabling SQLite's own autocheckpoint avoids it racing our cadence.
    conn.pragma_update(None, "wal_autocheckpoint", 0)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// A handle to the open database: the single writer connection, a pool of
/// reader connections, the shared transactional cache, and the resolved
/// configuration. Cheaply cloneable: clones share the same underlying
/// connections and cache, and each can independently open read sessions.
#[derive(Clone)]
pub struct Handle {
    pub(crate) writer: Arc<Mutex<Option<Connection>>>,
    pub(crate) reader_pool: Pool<SqliteConnectionManager>,
    pub(crate) cache: Arc<TransactionalCache>,
    pub(crate) config: Arc<StoreConfig>,
    pub(crate) commits_since_checkpoint: Arc<AtomicU64>,
}

impl Handle {
    /// Opens (creating if missing) the database at `config.db_path`,
    /// applies pragmas, and runs pending migrations.
    pub fn open(config: StoreConfig) -> Result<Self> {
        info!(path = %config.db_path.display(), "opening ledger store");

        let mut writer_conn = Connection::open(&config.db_path)
            .map_err(|e| StoreError::backend("open writer connection", e))?;
        apply_pragmas(&writer_conn, config.busy_timeout_ms)
            .map_err(|e| StoreError::backend("apply writer pragmas", e))?;
        migrations::run(&mut writer_conn)?;

        let manager = SqliteConnectionManager::file(&config.db_path).with_init(move |conn| {
            apply_pragmas(conn, config.busy_timeout_ms)
        });
        let reader_pool = Pool::builder()
            .max_size(config.reader_pool_max_connections)
            .build(manager)
            .map_err(|e| StoreError::backend("build reader pool", e))?;

        Ok(Self {
            writer: Arc::new(Mutex::new(Some(writer_conn))),
            reader_pool,
            cache: Arc::new(TransactionalCache::new()),
            config: Arc::new(config),
            commits_since_checkpoint: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &TransactionalCache {
        &self.cache
    }

    pub(crate) fn cache_arc(&self) -> Arc<TransactionalCache> {
        self.cache.clone()
    }

    /// Borrows a fresh read-only connection from the reader pool.
    pub(crate) fn reader_connection(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.reader_pool
            .get()
            .map_err(|e| StoreError::backend("acquire reader connection", e))
    }

    /// Locks the single writer connection for the duration of a write-tx.
    /// A second concurrent call blocks on this mutex rather than
    /// interleaving with the in-flight writer, which is how the
    /// at-most-one-writer invariant is enforced (see the crate docs).
    pub(crate) fn lock_writer(&self) -> parking_lot::MutexGuard<'_, Option<Connection>> {
        self.writer.lock()
    }

    /// Runs `wal_checkpoint(TRUNCATE)` every `wal_checkpoint_interval`
    /// successful commits.
    pub(crate) fn maybe_checkpoint(&self, conn: &Connection) -> Result<()> {
        let n = self.commits_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.config.wal_checkpoint_interval.max(1) == 0 {
            info!(commits = n, "running WAL checkpoint(TRUNCATE)");
            conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")
                .map_err(|e| StoreError::backend("wal checkpoint", e))?;
        }
        Ok(())
    }

    /// Idempotent close: drops the writer connection if still present.
    /// Further calls are no-ops. Read connections are returned to (and
    /// eventually dropped by) the pool independently.
    pub fn close(&self) {
        let mut guard = self.writer.lock();
        if guard.take().is_some() {
            info!("closed ledger store writer connection");
        }
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.config.db_path
    }
}
