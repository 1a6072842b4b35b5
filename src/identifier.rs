//! Canonical record identifiers.
//!
//! Stores hand out identifiers in two interchangeable encodings: a 15-character
//! case-sensitive form and an 18-character form whose last three characters
//! encode the case of the first fifteen. [`RecordId`] always holds the
//! 18-character form, so equality, ordering and hashing do not depend on which
//! encoding a value arrived in.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrationError, Result};

const SUFFIX_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ012345";

/// Length of the key prefix that identifies an entity type
pub const KEY_PREFIX_LEN: usize = 3;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]{15}(?:[A-Za-z0-5]{3})?$").expect("identifier pattern is valid")
    })
}

/// A record identifier in canonical 18-character form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(String);

impl RecordId {
    /// Parse a 15- or 18-character identifier.
    ///
    /// An 18-character identifier must carry the suffix that matches its
    /// first fifteen characters.
    ///
    /// # Example
    ///
    /// ```
    /// use skein::RecordId;
    ///
    /// let short = RecordId::parse("001000000000000").unwrap();
    /// let long = RecordId::parse("001000000000000AAA").unwrap();
    /// assert_eq!(short, long);
    /// ```
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if !id_pattern().is_match(value) {
            return Err(MigrationError::InvalidIdentifier(value.to_string()));
        }

        let base = &value[..15];
        let suffix = checksum_suffix(base);

        if value.len() == 18 && !value[15..].eq_ignore_ascii_case(&suffix) {
            return Err(MigrationError::InvalidIdentifier(value.to_string()));
        }

        Ok(RecordId(format!("{}{}", base, suffix)))
    }

    /// The 18-character form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 15-character case-sensitive form
    pub fn short(&self) -> &str {
        &self.0[..15]
    }

    /// Key prefix identifying the entity type this record belongs to
    pub fn key_prefix(&self) -> &str {
        &self.0[..KEY_PREFIX_LEN]
    }
}

/// Compute the three-character case checksum for a 15-character identifier.
fn checksum_suffix(base: &str) -> String {
    let bytes = base.as_bytes();
    let mut suffix = String::with_capacity(3);

    for chunk in bytes.chunks(5) {
        let mut bits = 0usize;
        for (j, c) in chunk.iter().enumerate() {
            if c.is_ascii_uppercase() {
                bits += 1 << j;
            }
        }
        suffix.push(SUFFIX_ALPHABET[bits] as char);
    }

    suffix
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        RecordId::parse(s)
    }
}

impl TryFrom<&str> for RecordId {
    type Error = MigrationError;

    fn try_from(value: &str) -> Result<Self> {
        RecordId::parse(value)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RecordId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
