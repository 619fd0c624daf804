//! E.164 phone numbers, the unit of discovery.

use crate::error::TypeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest value representable in 15 decimal digits (the E.164 maximum).
const MAX_DIGITS: u64 = 999_999_999_999_999;

/// A validated E.164 phone number.
///
/// Stored as the raw digit value so it can be encoded directly as the
/// 8-byte big-endian integer the wire protocol expects.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct E164(u64);

impl E164 {
    /// Parse a `+`-prefixed international phone number.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let digits = s
            .strip_prefix('+')
            .ok_or_else(|| TypeError::InvalidE164(s.to_string()))?;
        if digits.is_empty() || digits.len() > 15 || digits.starts_with('0') {
            return Err(TypeError::InvalidE164(s.to_string()));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| TypeError::InvalidE164(s.to_string()))?;
        Ok(Self(value))
    }

    /// Build from the raw digit value used on the wire.
    pub fn from_digits(value: u64) -> Result<Self, TypeError> {
        if value == 0 || value > MAX_DIGITS {
            return Err(TypeError::InvalidE164(format!("{value}")));
        }
        Ok(Self(value))
    }

    /// The raw digit value, e.g. `15551234567` for `+15551234567`.
    pub fn digits(self) -> u64 {
        self.0
    }

    /// The 8-byte big-endian wire encoding.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl fmt::Debug for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E164(+{})", self.0)
    }
}

impl FromStr for E164 {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for E164 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for E164 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
