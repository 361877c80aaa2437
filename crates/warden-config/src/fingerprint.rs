//! Content fingerprints for change detection
//!
//! A fingerprint is the SHA-256 digest of the RFC 8785 canonical serialization of
//! a value, so key order and whitespace in the source document never matter.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use warden_foundation::WardenResult;

/// Hex-encoded SHA-256 digest of a canonical serialization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable value by its canonical content
    pub fn of<T: Serialize>(value: &T) -> WardenResult<Self> {
        let canonical = serde_jcs::to_vec(value)?;
        Ok(Self::of_bytes(&canonical))
    }

    fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
