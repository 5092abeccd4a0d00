//! Core types for the subscription client.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Metadata property carried by every document.
pub const METADATA: &str = "@metadata";

/// Identity field inside document metadata.
pub const METADATA_ID: &str = "@id";

/// Etag field inside document metadata.
pub const METADATA_ETAG: &str = "@etag";

/// Server-side identifier of a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one client connection to a subscription.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a fresh random connection id.
    pub fn generate() -> Self {
        ConnectionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned progress marker.
///
/// Ordered by `restarts` first, then `changes`. The text form is the 16
/// big-endian bytes in hex, grouped `8-4-4-4-12`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Etag {
    pub restarts: u64,
    pub changes: u64,
}

impl Etag {
    pub const fn new(restarts: u64, changes: u64) -> Self {
        Self { restarts, changes }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.restarts.to_be_bytes());
        bytes[8..].copy_from_slice(&self.changes.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut restarts = [0u8; 8];
        let mut changes = [0u8; 8];
        restarts.copy_from_slice(&bytes[..8]);
        changes.copy_from_slice(&bytes[8..]);
        Self {
            restarts: u64::from_be_bytes(restarts),
            changes: u64::from_be_bytes(changes),
        }
    }
}

/// Error returned when parsing an etag from text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid etag: {0}")]
pub struct ParseEtagError(pub String);

impl FromStr for Etag {
    type Err = ParseEtagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != 32 {
            return Err(ParseEtagError(s.to_string()));
        }
        let bytes = hex::decode(&digits).map_err(|_| ParseEtagError(s.to_string()))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ParseEtagError(s.to_string()))?;
        Ok(Etag::from_bytes(arr))
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.to_bytes());
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

impl fmt::Debug for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Etag({})", self)
    }
}

impl Serialize for Etag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Etag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A document delivered by a subscription, kept as its raw JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    pub fn new(body: Value) -> Self {
        Document(body)
    }

    /// The document's metadata object, if present.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get(METADATA).and_then(Value::as_object)
    }

    /// Identity stored in the metadata (`@metadata.@id`).
    pub fn id(&self) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get(METADATA_ID))
            .and_then(Value::as_str)
    }

    /// Etag stored in the metadata, when present and well formed.
    pub fn etag(&self) -> Option<Etag> {
        self.metadata()
            .and_then(|m| m.get(METADATA_ETAG))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn body(&self) -> &Value {
        &self.0
    }

    pub fn into_body(self) -> Value {
        self.0
    }
}

impl From<Value> for Document {
    fn from(body: Value) -> Self {
        Document(body)
    }
}
