//! Stable type signatures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width signature of a logical message type name
///
/// Computed as the CRC-32 of the type name, so two processes built from the
/// same type definitions always agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeSignature(u32);

impl TypeSignature {
    /// Compute the signature of a logical type name
    pub fn of(type_name: &str) -> Self {
        Self(crc32fast::hash(type_name.as_bytes()))
    }

    /// Wrap a raw signature read from the wire
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value as written on the wire
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
