// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The `metadata` table has no `LatestLedgerSequence` row yet.
    #[error("database is empty: no latest ledger sequence recorded")]
    EmptyDB,

    /// No checkpoint is available from the history archive to seed a
    /// baseline ingestion.
    #[error("no checkpoint available from archive")]
    EmptyArchives,

    /// A data-integrity invariant that the store relies on does not hold,
    /// e.g. duplicate rows for a key that is supposed to be unique.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A key or entry could not be decoded.
    #[error("codec error: {0}")]
    CodecError(String),

    /// A ledger-meta row already exists for the sequence being inserted.
    #[error("ledger meta already exists for sequence {0}")]
    DuplicateSequence(u32),

    /// An underlying I/O or SQL error.
    #[error("backend error during {operation}: {source}")]
    BackendError {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Cooperative shutdown was requested; not an error for observability
    /// purposes, but still threaded through `Result` so callers unwind
    /// cleanly.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn backend(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        StoreError::BackendError {
            operation,
            source: source.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::BackendError {
            operation: "sqlite",
            source: err.into(),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::BackendError {
            operation: "connection pool",
            source: err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
