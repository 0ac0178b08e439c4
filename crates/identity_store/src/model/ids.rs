//! Identifier formats.
//!
//! # Invariants
//! - Human-readable IDs are 2..=36 chars of `[a-z0-9]`, single dashes
//!   allowed between alphanumerics only.
//! - `Eui64` renders as 16 upper-case hex digits and parses either case.

use super::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static ENTITY_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9](?:-?[a-z0-9]){1,35}$").expect("valid entity id regex"));

/// Validates a human-readable entity identifier.
pub fn validate_id(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if ENTITY_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidId {
            kind,
            value: value.to_string(),
        })
    }
}

/// 64-bit extended unique identifier (gateway hardware address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Eui64([u8; 8]);

impl Eui64 {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl Display for Eui64 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for Eui64 {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidEui(value.to_string());
        if value.len() != 16 || !value.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut bytes = [0u8; 8];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &value[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Eui64 {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Eui64> for String {
    fn from(value: Eui64) -> Self {
        value.to_string()
    }
}
