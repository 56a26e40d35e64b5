//! Connection identifiers
//!
//! Peers are addressed by a nine digit identifier that users read aloud or
//! type by hand, displayed as three groups (`123-456-789`). Dashes and
//! whitespace are cosmetic: two identifiers are equal when their digit
//! sequences match.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdError;

/// Number of digits in a connection identifier (without dashes)
pub const CONNECTION_ID_LENGTH: usize = 9;

/// Smallest generated identifier (no leading zero)
const GENERATED_MIN: u32 = 100_000_000;

/// Count of distinct generated identifiers
const GENERATED_SPAN: u32 = 900_000_000;

/// A normalized nine digit connection identifier
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Draw a uniformly random identifier from the OS entropy source.
    pub fn generate() -> Result<Self, IdError> {
        // Reject the tail of the u32 range so every value is equally likely.
        let zone = u32::MAX - (u32::MAX % GENERATED_SPAN);
        loop {
            let n = getrandom::u32().map_err(|e| IdError::Entropy(e.to_string()))?;
            if n < zone {
                return Ok(Self((GENERATED_MIN + n % GENERATED_SPAN).to_string()));
            }
        }
    }

    /// Parse any dash placement of nine digits
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = normalize_connection_id(input);
        is_normalized(&normalized).then_some(Self(normalized))
    }

    /// The bare digit sequence
    pub fn as_digits(&self) -> &str {
        &self.0
    }
}

impl FromStr for ConnectionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| IdError::Malformed(s.to_string()))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_connection_id(&self.0))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalize an identifier (remove dashes and whitespace)
pub fn normalize_connection_id(id: &str) -> String {
    id.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Validate an identifier's format
pub fn validate_connection_id(id: &str) -> bool {
    is_normalized(&normalize_connection_id(id))
}

/// Format a normalized identifier with dashes (e.g., "123456789" -> "123-456-789")
pub fn format_connection_id(normalized: &str) -> String {
    if is_normalized(normalized) {
        format!(
            "{}-{}-{}",
            &normalized[..3],
            &normalized[3..6],
            &normalized[6..]
        )
    } else {
        normalized.to_string()
    }
}

fn is_normalized(s: &str) -> bool {
    s.len() == CONNECTION_ID_LENGTH && s.bytes().all(|b| b.is_ascii_digit())
}
