// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Thin adapter letting the external VM look up ledger entries through a
//! pinned read-tx for the duration of one preflight simulation.

use crate::codec::LedgerKey;
use crate::db::Handle;
use crate::error::Result;
use crate::read_tx::ReadTx;

/// Owns a cached read-tx for the lifetime of a single preflight/simulation
/// call. `get`/`has` both delegate to that same read-tx so the VM sees one
/// consistent ledger-entry snapshot regardless of concurrent writers.
pub struct PreflightSnapshot {
    read_tx: ReadTx,
}

impl PreflightSnapshot {
    pub fn open(handle: &Handle) -> Result<Self> {
        Ok(Self {
            read_tx: ReadTx::begin(handle, true)?,
        })
    }

    /// Returns the entry bytes for `key`, or `None` if absent.
    pub fn get(&mut self, key: &LedgerKey) -> Result<Option<Vec<u8>>> {
        let mut found = self.read_tx.get_entries(std::slice::from_ref(key))?;
        Ok(found.pop().map(|(_, entry)| entry))
    }

    /// Whether `key` currently has an entry.
    pub fn has(&mut self, key: &LedgerKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Releases the underlying read-tx. Idempotent; also runs on `Drop`.
    pub fn close(mut self) -> Result<()> {
        self.read_tx.done()
    }
}
