use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of one revision of a record.
///
/// Layout: `[8 bytes: big-endian milliseconds since UNIX epoch]`
/// `[24 bytes: BLAKE3 prefix of the payload]`. Because the timestamp leads,
/// byte order is temporal order, so a `BTreeMap<VersionKey, _>` iterates
/// revisions oldest first.
///
/// The all-zero key is the "unversioned / only revision" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey([u8; 32]);

impl VersionKey {
    /// The unversioned sentinel.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Build a version key from a timestamp and the payload it versions.
    pub fn new(timestamp_ms: u64, payload: &[u8]) -> Self {
        let digest = blake3::hash(payload);
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&timestamp_ms.to_be_bytes());
        bytes[8..].copy_from_slice(&digest.as_bytes()[..24]);
        Self(bytes)
    }

    /// Build a version key stamped with the current wall-clock time.
    pub fn now(payload: &[u8]) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::new(timestamp_ms, payload)
    }

    /// Create from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns `true` for the unversioned sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The embedded creation timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(ts)
    }

    /// Returns `true` if this revision was stamped strictly before `other`.
    pub fn is_older_than(&self, other: &Self) -> bool {
        self.timestamp_ms() < other.timestamp_ms()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl Default for VersionKey {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "VersionKey(zero)");
        }
        write!(
            f,
            "VersionKey({}ms.{})",
            self.timestamp_ms(),
            hex::encode(&self.0[8..12])
        )
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "v0");
        }
        write!(f, "{}.{}", self.timestamp_ms(), hex::encode(&self.0[8..12]))
    }
}
