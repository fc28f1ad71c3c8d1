// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The public entry point: wires the database handle, cache, writers, and
//! readers into the single `Store` type external callers use.

use crate::config::StoreConfig;
use crate::db::Handle;
use crate::error::Result;
use crate::meta_reader::MetaReader;
use crate::preflight::PreflightSnapshot;
use crate::read_tx::ReadTx;
use crate::write_tx::WriteTx;

/// The top-level storage engine. Cheap to clone; clones share the same
/// underlying connections, cache, and configuration.
#[derive(Clone)]
pub struct Store {
    handle: Handle,
}

impl Store {
    /// Opens (creating if missing) the ledger store at `config.db_path`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Ok(Self {
            handle: Handle::open(config)?,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        self.handle.config()
    }

    /// Closes the writer connection. Idempotent; outstanding read
    /// connections drain back to the pool independently.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Returns the latest committed ledger sequence, or `EmptyDB` if the
    /// store has never committed a ledger.
    pub fn latest_ledger_sequence(&self) -> Result<u32> {
        let mut read = ReadTx::begin(&self.handle, false)?;
        read.latest_ledger_sequence()
    }

    /// Begins the single allowed concurrent read-write transaction. Blocks
    /// until any prior `WriteTx` has committed or rolled back.
    pub fn begin_write_tx(&self) -> Result<WriteTx<'_>> {
        WriteTx::begin(&self.handle)
    }

    /// Begins a read-only transaction. `cached` takes a consistent snapshot
    /// of the transactional config-entry cache alongside the DB read view;
    /// pass `false` for callers that don't care about config entries and
    /// want to skip the cache bookkeeping.
    pub fn begin_read_tx(&self, cached: bool) -> Result<ReadTx> {
        ReadTx::begin(&self.handle, cached)
    }

    /// Opens a cached read-tx wrapped for repeated use across one
    /// preflight/simulation call.
    pub fn open_preflight_snapshot(&self) -> Result<PreflightSnapshot> {
        PreflightSnapshot::open(&self.handle)
    }

    /// A read-only view over `ledger_close_meta`, independent of any
    /// pinned transaction.
    pub fn ledger_meta(&self) -> Result<MetaReader> {
        MetaReader::new(&self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_entry;

    fn config() -> (tempfile::TempDir, StoreConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.db_path = dir.path().join("ledger.sqlite3");
        (dir, config)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, config) = config();
        let store = Store::open(config).unwrap();

        let mut tx = store.begin_write_tx().unwrap();
        let entry = encode_entry(0x02, b"account/alice", b"balance=100");
        tx.upsert(entry.clone()).unwrap();
        tx.commit(1).unwrap();

        assert_eq!(store.latest_ledger_sequence().unwrap(), 1);

        let mut read = store.begin_read_tx(false).unwrap();
        let got = read.get_entries(&[b"account/alice".to_vec()]).unwrap();
        assert_eq!(got, vec![(b"account/alice".to_vec(), entry)]);
    }

    #[test]
    fn ledger_meta_is_queryable_after_commit() {
        let (_dir, config) = config();
        let store = Store::open(config).unwrap();

        let mut tx = store.begin_write_tx().unwrap();
        tx.insert_meta(5, b"close-meta").unwrap();
        tx.commit(5).unwrap();

        let reader = store.ledger_meta().unwrap();
        assert_eq!(reader.get_ledger(5).unwrap(), Some(b"close-meta".to_vec()));
    }

    #[test]
    fn random_entries_round_trip_through_commit() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let (_dir, config) = config();
        let store = Store::open(config).unwrap();
        let mut rng = StdRng::seed_from_u64(0xbeef);

        let mut expected = Vec::new();
        let mut tx = store.begin_write_tx().unwrap();
        for i in 0..50 {
            let key = format!("account/{i}").into_bytes();
            let mut value = vec![0u8; 16];
            rng.fill(&mut value[..]);
            let entry = encode_entry(0x02, &key, &value);
            tx.upsert(entry.clone()).unwrap();
            expected.push((key, entry));
        }
        tx.commit(1).unwrap();

        let mut read = store.begin_read_tx(false).unwrap();
        for (key, entry) in expected {
            assert_eq!(read.get_entries(&[key.clone()]).unwrap(), vec![(key, entry)]);
        }
    }

    #[test]
    fn close_then_reopen_preserves_data() {
        let (_dir, config) = config();
        {
            let store = Store::open(config.clone()).unwrap();
            let mut tx = store.begin_write_tx().unwrap();
            tx.upsert(encode_entry(0x02, b"k", b"v")).unwrap();
            tx.commit(1).unwrap();
            store.close();
        }

        let store = Store::open(config).unwrap();
        assert_eq!(store.latest_ledger_sequence().unwrap(), 1);
    }
}
