//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Fixed prefix of every job identifier.
pub const JOB_ID_PREFIX: &str = "job_";

/// Number of lowercase hex characters following [`JOB_ID_PREFIX`].
pub const JOB_ID_HEX_LEN: usize = 32;

/// Identifier of an admitted generation job.
///
/// Shape: `job_` followed by exactly 32 lowercase hexadecimal characters. The
/// shape is an external contract; anything else is rejected before it reaches
/// any lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Create a new random identifier (UUIDv4, 122 bits of OS randomness).
    pub fn generate() -> Self {
        Self(format!("{JOB_ID_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Check a token against the identifier shape without allocating.
    pub fn is_well_formed(token: &str) -> bool {
        let Some(hex) = token.strip_prefix(JOB_ID_PREFIX) else {
            return false;
        };
        hex.len() == JOB_ID_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if Self::is_well_formed(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::invalid_id("JobId: expected job_<32 lowercase hex>"))
        }
    }
}

impl TryFrom<String> for JobId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_well_formed(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::invalid_id("JobId: expected job_<32 lowercase hex>"))
        }
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

/// Key that identifies a caller for throttling (usually a peer address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
