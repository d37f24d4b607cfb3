//! Identifier types used throughout the zonesync core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A remote partition holding a related set of records.
///
/// Zones are the unit of subscription and of token-scoped incremental fetch.
/// One zone may host one record type or be shared by several.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId {
    /// Zone name, unique per owner.
    pub name: String,
    /// Owner of the zone.
    pub owner: String,
}

impl ZoneId {
    /// Owner name used when the current account owns the zone.
    pub const DEFAULT_OWNER: &'static str = "__defaultOwner__";

    /// Name of the zone that always exists and needs no creation.
    pub const DEFAULT_ZONE_NAME: &'static str = "_defaultZone";

    /// Creates a zone ID.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// Creates a zone ID owned by the current account.
    pub fn owned(name: impl Into<String>) -> Self {
        Self::new(name, Self::DEFAULT_OWNER)
    }

    /// The always-present default zone.
    pub fn default_zone() -> Self {
        Self::owned(Self::DEFAULT_ZONE_NAME)
    }

    /// Returns true for the always-present default zone.
    pub fn is_default_zone(&self) -> bool {
        self.name == Self::DEFAULT_ZONE_NAME
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

/// Identity of a record on the remote: `(zone, unique id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Stable unique identifier, equal to the local primary key.
    pub unique_id: String,
    /// Zone the record belongs to.
    pub zone_id: ZoneId,
}

impl RecordId {
    /// Creates a record ID.
    pub fn new(unique_id: impl Into<String>, zone_id: ZoneId) -> Self {
        Self {
            unique_id: unique_id.into(),
            zone_id,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone_id, self.unique_id)
    }
}

/// Opaque resumption cursor issued by the remote change feed.
///
/// The core never interprets the bytes. Re-presenting a token resumes exactly
/// where the fetch that produced it completed.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Wraps raw token bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for ChangeToken {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "ChangeToken({s})"),
            _ => write!(f, "ChangeToken({} bytes)", self.0.len()),
        }
    }
}

/// Identifier tagging a long-lived write so the remote runtime can resume it
/// after process termination without double submission.
/// Uses UUID v7 which embeds a timestamp for natural ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an operation ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
