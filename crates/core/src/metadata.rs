//! Object metadata and stored object records.

use crate::piece::PieceCid;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Maximum number of metadata entries per object.
pub const MAX_METADATA_ENTRIES: usize = 5;

/// Maximum metadata key length in characters.
pub const MAX_METADATA_KEY_LEN: usize = 32;

/// Maximum metadata value length in characters.
pub const MAX_METADATA_VALUE_LEN: usize = 128;

/// Small, ordered key/value metadata attached to an object.
///
/// Keys travel as HTTP header names, which are case-insensitive, so only
/// lowercase ASCII letters, digits, `-`, `_` and `.` are accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectMetadata(BTreeMap<String, String>);

impl ObjectMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build metadata from pairs, validating the result.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut metadata = Self::new();
        for (key, value) in pairs {
            metadata.insert(key, value)?;
        }
        Ok(metadata)
    }

    /// Insert an entry, rejecting it if limits would be exceeded.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        check_entry(&key, &value)?;
        if !self.0.contains_key(&key) && self.0.len() >= MAX_METADATA_ENTRIES {
            return Err(Error::InvalidMetadata(format!(
                "at most {MAX_METADATA_ENTRIES} entries allowed"
            )));
        }
        self.0.insert(key, value);
        Ok(())
    }

    /// Validate metadata that arrived without going through `insert`,
    /// e.g. after deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.0.len() > MAX_METADATA_ENTRIES {
            return Err(Error::InvalidMetadata(format!(
                "{} entries exceeds the limit of {MAX_METADATA_ENTRIES}",
                self.0.len()
            )));
        }
        for (key, value) in &self.0 {
            check_entry(key, value)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn check_entry(key: &str, value: &str) -> Result<()> {
    let key_len = key.chars().count();
    if key_len == 0 || key_len > MAX_METADATA_KEY_LEN {
        return Err(Error::InvalidMetadata(format!(
            "key {key:?} must be 1 to {MAX_METADATA_KEY_LEN} characters"
        )));
    }
    if let Some(bad) = key.chars().find(|&c| !is_key_char(c)) {
        return Err(Error::InvalidMetadata(format!(
            "key {key:?} contains {bad:?}; use lowercase letters, digits, '-', '_' or '.'"
        )));
    }
    if value.chars().count() > MAX_METADATA_VALUE_LEN {
        return Err(Error::InvalidMetadata(format!(
            "value for {key:?} exceeds {MAX_METADATA_VALUE_LEN} characters"
        )));
    }
    Ok(())
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
}

/// JSON record persisted next to every committed object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub identifier: PieceCid,
    pub size: u64,
    #[serde(default)]
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub with_cdn: bool,
    /// Name of the provider that accepted the upload.
    pub provider: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

impl ObjectRecord {
    /// Serialize to pretty JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let record: Self =
            serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))?;
        record.metadata.validate()?;
        Ok(record)
    }
}
