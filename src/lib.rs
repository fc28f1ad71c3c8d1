// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A persistent, versioned ledger-entry and ledger-meta storage engine
//! backed by SQLite in WAL mode, with a transactional in-memory cache for
//! config-setting entries and an async ingestion pipeline that keeps the
//! store current with an upstream history archive and ledger backend.
//!
//! The store guarantees at most one writer at a time and snapshot-isolated
//! readers: a `ReadTx` (and, by extension, a `PreflightSnapshot` built on
//! top of one) always sees a consistent view of both the DB and the
//! transactional cache, regardless of concurrent commits.

mod cache;
mod codec;
mod config;
mod db;
mod entry_writer;
mod error;
mod ingestion;
mod meta_reader;
mod meta_writer;
mod preflight;
mod read_tx;
mod store;
mod write_tx;

pub use codec::{encode_entry, entry_kind, is_config_setting, key_of, LedgerKey, ENTRY_KIND_CONFIG_SETTING};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use ingestion::{ArchiveBackend, Change, IngestionRunner, LedgerBackend, LedgerClose};
pub use meta_reader::MetaReader;
pub use preflight::PreflightSnapshot;
pub use read_tx::ReadTx;
pub use store::Store;
pub use write_tx::WriteTx;
