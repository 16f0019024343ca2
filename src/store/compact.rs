//! Compacted string form of a [`PropertyStore`].
//!
//! Layout: `PS1;<crc16>;<key>=<value>;<key>=<value>...`
//!
//! - Keys are percent-encoded so `;`, `=` and `%` never appear raw.
//! - Entries are written in ascending key order.
//! - The CRC-16 (IBM SDLC) covers the entry section only.

use std::collections::BTreeMap;

use crc::{Crc, CRC_16_IBM_SDLC};
use log::warn;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

use super::{lock_recover, PropertyStore};
use crate::logutil::escape_log;
use crate::metrics;

const MAGIC: &str = "PS1";
const SEPARATOR: char = ';';
const KEY_ESCAPES: &AsciiSet = &CONTROLS.add(b';').add(b'=').add(b'%').add(b' ');
const CHECKSUM: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Decode failure for a compacted store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataCorruptError {
    #[error("empty input")]
    Empty,

    #[error("unknown header {0:?}")]
    BadHeader(String),

    #[error("missing or unreadable checksum {0:?}")]
    BadChecksum(String),

    #[error("checksum mismatch: stored {stored:04x}, computed {computed:04x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    #[error("malformed token #{index}: {token:?}")]
    MalformedToken { index: usize, token: String },

    #[error("invalid value {value:?} for key {key:?}")]
    BadValue { key: String, value: String },

    #[error("key in token #{0} is not valid utf-8")]
    BadKeyEncoding(usize),

    #[error("duplicate key {0:?}")]
    DuplicateKey(String),
}

pub(crate) fn encode(values: &BTreeMap<String, i64>) -> String {
    let body = values
        .iter()
        .map(|(key, value)| format!("{}={}", utf8_percent_encode(key, KEY_ESCAPES), value))
        .collect::<Vec<_>>()
        .join(";");
    format!(
        "{MAGIC}{SEPARATOR}{:04x}{SEPARATOR}{body}",
        CHECKSUM.checksum(body.as_bytes())
    )
}

pub(crate) fn decode(data: &str) -> Result<BTreeMap<String, i64>, DataCorruptError> {
    if data.is_empty() {
        return Err(DataCorruptError::Empty);
    }
    let mut parts = data.splitn(3, SEPARATOR);
    let header = parts.next().unwrap_or_default();
    if header != MAGIC {
        return Err(DataCorruptError::BadHeader(header.to_string()));
    }
    let checksum_token = parts.next().unwrap_or_default();
    let body = parts
        .next()
        .ok_or_else(|| DataCorruptError::BadChecksum(checksum_token.to_string()))?;
    let stored = u16::from_str_radix(checksum_token, 16)
        .map_err(|_| DataCorruptError::BadChecksum(checksum_token.to_string()))?;
    let computed = CHECKSUM.checksum(body.as_bytes());
    if stored != computed {
        return Err(DataCorruptError::ChecksumMismatch { stored, computed });
    }

    let mut values = BTreeMap::new();
    if body.is_empty() {
        return Ok(values);
    }
    for (index, token) in body.split(SEPARATOR).enumerate() {
        let (raw_key, raw_value) =
            token
                .split_once('=')
                .ok_or_else(|| DataCorruptError::MalformedToken {
                    index,
                    token: token.to_string(),
                })?;
        let key = percent_decode_str(raw_key)
            .decode_utf8()
            .map_err(|_| DataCorruptError::BadKeyEncoding(index))?
            .into_owned();
        let value = raw_value
            .parse::<i64>()
            .map_err(|_| DataCorruptError::BadValue {
                key: key.clone(),
                value: raw_value.to_string(),
            })?;
        if values.insert(key.clone(), value).is_some() {
            return Err(DataCorruptError::DuplicateKey(key));
        }
    }
    Ok(values)
}

impl PropertyStore {
    /// Serialize every property into the compacted string form.
    pub fn compact(&self) -> String {
        encode(&lock_recover(&self.inner).values)
    }

    /// Build a new store named `name` from a compacted string.
    pub fn reconstruct(name: &str, data: &str) -> Result<PropertyStore, DataCorruptError> {
        Ok(PropertyStore::with_values(name, decode(data)?))
    }

    /// Replace this store's content with a compacted string without
    /// notifying listeners. On error the store is left untouched.
    pub fn restore_from(&self, data: &str) -> Result<(), DataCorruptError> {
        let values = decode(data)?;
        self.replace_values(values);
        Ok(())
    }

    /// Restore `data` into this store, falling back to an empty store when it
    /// is corrupt. Returns `false` when the fallback was taken.
    pub fn restore_or_reset(&self, data: Option<&str>) -> bool {
        let Some(data) = data else {
            self.replace_values(BTreeMap::new());
            return true;
        };
        match self.restore_from(data) {
            Ok(()) => true,
            Err(e) => {
                metrics::inc_corrupt_loads();
                warn!(
                    "store[{}]: discarding corrupt data ({}): {}",
                    self.name(),
                    e,
                    escape_log(data)
                );
                self.replace_values(BTreeMap::new());
                false
            }
        }
    }
}
