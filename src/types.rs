//! Shared primitive types used across collection, generation, validation and rollout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated 32-bit Autonomous System number.
///
/// The valid range is `[0, u32::MAX]`; callers that need to reject the
/// RFC 7607 / AS_TRANS / reserved values do so explicitly (see `inspector::StrictnessFilter`)
/// since those exclusions are mode-dependent, not part of the bare numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsNumber(u32);

impl AsNumber {
    pub fn new(value: u64) -> Result<Self, AsNumberError> {
        if value > u32::MAX as u64 {
            return Err(AsNumberError::OutOfRange(value));
        }
        Ok(Self(value as u32))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AsNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for AsNumber {
    type Error = AsNumberError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(Self(value))
    }
}

impl TryFrom<i64> for AsNumber {
    type Error = AsNumberError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(AsNumberError::Negative(value));
        }
        Self::new(value as u64)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AsNumberError {
    #[error("AS number {0} exceeds 2^32-1")]
    OutOfRange(u64),
    #[error("AS number {0} is negative")]
    Negative(i64),
}

/// Replaces filesystem-unsafe characters in a hostname so it can be used as a directory name.
///
/// `/ \ : * ? " < > |` become `-`, spaces become `_`.
pub fn sanitize_hostname(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            ' ' => '_',
            other => other,
        })
        .collect()
}

/// Synthesizes a deterministic hostname from a device address when none was supplied.
pub fn synthesize_hostname(address: &str) -> String {
    let safe: String = address
        .chars()
        .map(|c| if c == '.' || c == ':' { '-' } else { c })
        .collect();
    format!("router-{safe}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_number_accepts_full_u32_range() {
        assert!(AsNumber::new(0).is_ok());
        assert!(AsNumber::new(u32::MAX as u64).is_ok());
    }

    #[test]
    fn as_number_rejects_overflow() {
        assert_eq!(
            AsNumber::new(u32::MAX as u64 + 1),
            Err(AsNumberError::OutOfRange(u32::MAX as u64 + 1))
        );
    }

    #[test]
    fn sanitize_hostname_strips_reserved_characters() {
        assert_eq!(sanitize_hostname(r#"core/rtr:1 "x"<y>|z"#), "core-rtr-1_-x--y--z");
    }

    #[test]
    fn synthesize_hostname_from_address() {
        assert_eq!(synthesize_hostname("10.0.0.1"), "router-10-0-0-1");
        assert_eq!(synthesize_hostname("2001:db8::1"), "router-2001-db8--1");
    }
}
