// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The ingestion runner: a single long-running loop that applies an
//! initial checkpoint baseline, then a stream of per-ledger deltas,
//! expressed purely in terms of the storage interface. The history-archive
//! and ledger-close-meta backends are external collaborators; only their
//! interfaces are defined here (`ArchiveBackend`, `LedgerBackend`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::codec::LedgerKey;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::write_tx::WriteTx;

/// One state change applied by a write-tx: an upsert (the change's `Post`
/// was present) or a delete (`Post` absent, or an evicted temporary
/// entry).
pub enum Change {
    Upsert(Vec<u8>),
    Delete(LedgerKey),
}

/// A closed ledger's close-meta plus its ordered state changes.
pub struct LedgerClose {
    pub meta: Vec<u8>,
    pub changes: Vec<Change>,
}

/// The history-archive backend: provides checkpoint snapshots used to seed
/// an empty database.
#[async_trait]
pub trait ArchiveBackend: Send + Sync {
    /// The most recently published checkpoint sequence, or `0` if none is
    /// available yet.
    async fn latest_checkpoint_sequence(&self) -> Result<u32>;

    /// The full set of ledger-entry changes as of `checkpoint`.
    async fn checkpoint_changes(&self, checkpoint: u32) -> Result<Vec<Change>>;
}

/// The captive-core / RPC ledger backend: provides one closed ledger at a
/// time for streaming ingestion.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Fetches ledger `sequence`'s close-meta and decodes its changes.
    /// Returns `Ok(None)` if the ledger isn't available yet (the caller
    /// retries).
    async fn close_meta(&self, sequence: u32) -> Result<Option<LedgerClose>>;

    /// Prepares the backend to serve an unbounded range of ledgers
    /// starting at `next`. Concurrent with baseline ingestion; the runner
    /// waits for both to finish before entering STREAM.
    async fn prepare_range(&self, next: u32) -> Result<()>;
}

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a `Store` through the INIT → BASELINE? → STREAM ↔ RETRY state
/// machine described in the crate-level design notes.
pub struct IngestionRunner<A, L> {
    store: Store,
    archive: A,
    ledger: L,
    shutdown: Arc<AtomicBool>,
}

impl<A, L> IngestionRunner<A, L>
where
    A: ArchiveBackend,
    L: LedgerBackend,
{
    pub fn new(store: Store, archive: A, ledger: L) -> Self {
        Self {
            store,
            archive,
            ledger,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable handle that, when signaled, causes the run loop to exit
    /// after its current iteration returns control.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Runs the ingestion loop until cancelled. Errors other than
    /// cancellation are retried with a bounded exponential-like backoff;
    /// `EmptyArchives` resets the attempt counter so the node waits
    /// indefinitely for archives to appear.
    pub async fn run(&self) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if self.cancelled() {
                info!("ingestion cancelled, exiting run loop");
                return Ok(());
            }

            match self.step().await {
                Ok(()) => {
                    attempt = 0;
                }
                Err(StoreError::Cancelled) => {
                    info!("ingestion cancelled mid-step, exiting run loop");
                    return Ok(());
                }
                Err(StoreError::EmptyArchives) => {
                    warn!("no checkpoint available yet, waiting for archives");
                    attempt = 0;
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "ingestion step failed, retrying");
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(e);
                    }
                    tokio::time::sleep(RETRY_INTERVAL * attempt.min(MAX_RETRY_ATTEMPTS)).await;
                }
            }
        }
    }

    /// Decides between baseline and streaming mode, then advances one
    /// step (one ledger, or the whole baseline) of the pipeline.
    async fn step(&self) -> Result<()> {
        let next = match self.next_sequence()? {
            Next::Stream(next) => next,
            Next::Baseline => self.run_baseline().await? + 1,
        };

        self.ingest_one(next).await
    }

    fn next_sequence(&self) -> Result<Next> {
        let mut read = self.store.begin_read_tx(false)?;
        match read.latest_ledger_sequence() {
            Ok(seq) => Ok(Next::Stream(seq + 1)),
            Err(StoreError::EmptyDB) => Ok(Next::Baseline),
            Err(e) => Err(e),
        }
    }

    /// Seeds the database from the latest archive checkpoint. Returns the
    /// checkpoint sequence applied.
    async fn run_baseline(&self) -> Result<u32> {
        let checkpoint = self.archive.latest_checkpoint_sequence().await?;
        if checkpoint == 0 {
            return Err(StoreError::EmptyArchives);
        }

        let next = checkpoint + 1;
        let (changes, _) = tokio::try_join!(
            self.archive.checkpoint_changes(checkpoint),
            self.ledger.prepare_range(next),
        )?;

        debug!(checkpoint, changes = changes.len(), "applying baseline checkpoint");

        let mut tx = self.store.begin_write_tx()?;
        for change in changes {
            apply_change(&mut tx, change)?;
        }
        tx.commit(checkpoint)?;

        Ok(checkpoint)
    }

    async fn ingest_one(&self, sequence: u32) -> Result<()> {
        let close = match self.ledger.close_meta(sequence).await? {
            Some(close) => close,
            None => {
                // Ledger not closed yet: treat like any other retryable
                // condition rather than busy-looping.
                return Err(StoreError::backend(
                    "fetch close-meta",
                    anyhow::anyhow!("ledger {sequence} not yet available"),
                ));
            }
        };

        let mut tx = self.store.begin_write_tx()?;
        for change in close.changes {
            apply_change(&mut tx, change)?;
        }
        tx.insert_meta(sequence, &close.meta)?;
        tx.commit(sequence)?;

        Ok(())
    }
}

enum Next {
    Stream(u32),
    Baseline,
}

fn apply_change(tx: &mut WriteTx<'_>, change: Change) -> Result<()> {
    match change {
        Change::Upsert(entry) => tx.upsert(entry),
        Change::Delete(key) => tx.delete(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_entry;
    use crate::config::StoreConfig;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.db_path = dir.path().join("ledger.sqlite3");
        (dir, Store::open(config).unwrap())
    }

    struct FixedArchive {
        checkpoint: u32,
        changes: Vec<(u8, Vec<u8>, Vec<u8>)>, // (kind, key, value)
    }

    #[async_trait]
    impl ArchiveBackend for FixedArchive {
        async fn latest_checkpoint_sequence(&self) -> Result<u32> {
            Ok(self.checkpoint)
        }

        async fn checkpoint_changes(&self, _checkpoint: u32) -> Result<Vec<Change>> {
            Ok(self
                .changes
                .iter()
                .map(|(kind, key, value)| Change::Upsert(encode_entry(*kind, key, value)))
                .collect())
        }
    }

    struct CountingLedger {
        next_available: AtomicU32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl LedgerBackend for CountingLedger {
        async fn close_meta(&self, sequence: u32) -> Result<Option<LedgerClose>> {
            *self.calls.lock().unwrap() += 1;
            if sequence > self.next_available.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(LedgerClose {
                meta: format!("meta-{sequence}").into_bytes(),
                changes: vec![Change::Upsert(encode_entry(
                    0x02,
                    format!("k{sequence}").as_bytes(),
                    b"v",
                ))],
            }))
        }

        async fn prepare_range(&self, _next: u32) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_archive_checkpoint_is_empty_archives_error() {
        let (_dir, store) = test_store();
        let archive = FixedArchive {
            checkpoint: 0,
            changes: vec![],
        };
        let ledger = CountingLedger {
            next_available: AtomicU32::new(0),
            calls: Mutex::new(0),
        };
        let runner = IngestionRunner::new(store, archive, ledger);
        let err = runner.step().await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyArchives));
    }

    #[tokio::test]
    async fn baseline_then_stream_advances_latest_sequence() {
        let (_dir, store) = test_store();
        let archive = FixedArchive {
            checkpoint: 5,
            changes: vec![(0x02, b"base".to_vec(), b"v".to_vec())],
        };
        let ledger = CountingLedger {
            next_available: AtomicU32::new(10),
            calls: Mutex::new(0),
        };
        let runner = IngestionRunner::new(store.clone(), archive, ledger);

        // BASELINE + first STREAM ledger (sequence 6).
        runner.step().await.unwrap();
        assert_eq!(store.latest_ledger_sequence().unwrap(), 6);

        // Next step streams sequence 7.
        runner.step().await.unwrap();
        assert_eq!(store.latest_ledger_sequence().unwrap(), 7);
    }

    #[tokio::test]
    async fn cancellation_before_step_exits_cleanly() {
        let (_dir, store) = test_store();
        let archive = FixedArchive {
            checkpoint: 0,
            changes: vec![],
        };
        let ledger = CountingLedger {
            next_available: AtomicU32::new(0),
            calls: Mutex::new(0),
        };
        let runner = IngestionRunner::new(store, archive, ledger);
        runner.shutdown_handle().store(true, Ordering::SeqCst);
        runner.run().await.unwrap();
    }
}
