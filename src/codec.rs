// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deterministic binary encoding of ledger keys and entries.
//!
//! The store treats keys and entries as opaque byte strings produced by an
//! external codec (the wire format of ledger entries is out of scope, see
//! the crate's top-level design notes). The one piece of structure this
//! module does assume is the layout needed to (a) recover a key from an
//! entry without a side-table, and (b) recognize config-setting entries so
//! the transactional cache can decide what to hold.
//!
//! Entry layout: `[kind: u8][key_len: u32 LE][key bytes][value bytes]`.

use crate::error::{Result, StoreError};

pub type LedgerKey = Vec<u8>;

/// The entry-kind discriminant reserved for config-setting ledger entries.
/// Everything else is opaque to the store.
pub const ENTRY_KIND_CONFIG_SETTING: u8 = 0x01;

const HEADER_LEN: usize = 1 + 4;

/// Builds a canonical entry for a given kind/key/value. Exposed mainly for
/// tests and for callers that assemble entries outside the wire codec.
pub fn encode_entry(kind: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
    buf.push(kind);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

/// Extracts the canonical key embedded in an entry. The key is canonical by
/// construction: it is always the same bytes that would be produced by
/// hashing/encoding the entry's logical key independently.
pub fn key_of(entry: &[u8]) -> Result<LedgerKey> {
    let key_len = read_key_len(entry)?;
    entry
        .get(HEADER_LEN..HEADER_LEN + key_len)
        .map(|k| k.to_vec())
        .ok_or_else(|| StoreError::CodecError("entry shorter than declared key length".into()))
}

/// Returns the entry-kind discriminant, or a codec error if the entry is
/// too short to carry one.
pub fn entry_kind(entry: &[u8]) -> Result<u8> {
    entry
        .first()
        .copied()
        .ok_or_else(|| StoreError::CodecError("empty entry".into()))
}

/// Whether the entry decodes as a config-setting entry.
pub fn is_config_setting(entry: &[u8]) -> bool {
    matches!(entry_kind(entry), Ok(ENTRY_KIND_CONFIG_SETTING))
}

fn read_key_len(entry: &[u8]) -> Result<usize> {
    let len_bytes = entry
        .get(1..HEADER_LEN)
        .ok_or_else(|| StoreError::CodecError("entry too short for key-length header".into()))?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(len_bytes);
    Ok(u32::from_le_bytes(buf) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_of_recovers_embedded_key() {
        let entry = encode_entry(ENTRY_KIND_CONFIG_SETTING, b"cfg/max_fee", b"1000");
        assert_eq!(key_of(&entry).unwrap(), b"cfg/max_fee".to_vec());
        assert!(is_config_setting(&entry));
    }

    #[test]
    fn non_config_entry_is_not_cached() {
        let entry = encode_entry(0x02, b"account/alice", b"balance=5");
        assert!(!is_config_setting(&entry));
    }

    #[test]
    fn truncated_entry_is_a_codec_error() {
        let err = key_of(&[0x01, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, StoreError::CodecError(_)));
    }
}
