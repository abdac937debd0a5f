use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use pv_crypto::{ContentHash, ContentHasher, ProtectionKeys, PublicKey, Signature};
use pv_types::{KeyTriple, VersionKey, VersionedKey};

use crate::error::StoreResult;

/// One immutable revision of a record.
///
/// A record with a non-zero `based_on` asserts that it is the successor of
/// the revision whose version key equals `based_on`. "Updating" a record
/// means building a new `VersionedRecord` on top of the current head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub payload: Bytes,
    pub version: VersionKey,
    pub based_on: VersionKey,
    pub created_at_ms: u64,
    /// Time to live in seconds; zero never expires.
    pub ttl_secs: u64,
    /// Set on protection-key-only changes: the key that becomes the new
    /// owner. Such records carry no content and never enter the chain.
    pub rekey: Option<PublicKey>,
}

impl VersionedRecord {
    /// A new revision stamped with the current wall-clock time.
    pub fn new(payload: impl Into<Bytes>, version: VersionKey, based_on: VersionKey) -> Self {
        Self {
            payload: payload.into(),
            version,
            based_on,
            created_at_ms: now_ms(),
            ttl_secs: 0,
            rekey: None,
        }
    }

    /// A root revision whose version key is derived from its payload.
    pub fn root(payload: impl Into<Bytes>, timestamp_ms: u64) -> Self {
        let payload = payload.into();
        let version = VersionKey::new(timestamp_ms, &payload);
        Self::new(payload, version, VersionKey::ZERO)
    }

    /// A successor of `parent` whose version key is derived from its payload.
    pub fn successor(payload: impl Into<Bytes>, timestamp_ms: u64, parent: VersionKey) -> Self {
        let payload = payload.into();
        let version = VersionKey::new(timestamp_ms, &payload);
        Self::new(payload, version, parent)
    }

    /// A protection-key-only change handing ownership to `new_owner`.
    pub fn protection_change(new_owner: PublicKey) -> Self {
        Self {
            payload: Bytes::new(),
            version: VersionKey::ZERO,
            based_on: VersionKey::ZERO,
            created_at_ms: now_ms(),
            ttl_secs: 0,
            rekey: Some(new_owner),
        }
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_created_at(mut self, created_at_ms: u64) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    pub fn is_protection_change(&self) -> bool {
        self.rekey.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.based_on.is_zero()
    }

    /// Returns `true` once `created_at + ttl` lies in the past.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        if self.ttl_secs == 0 {
            return false;
        }
        let expires_at = self
            .created_at_ms
            .saturating_add(self.ttl_secs.saturating_mul(1000));
        now_ms >= expires_at
    }

    /// Domain-separated hash of the payload.
    pub fn content_hash(&self) -> ContentHash {
        ContentHasher::PAYLOAD.hash(&self.payload)
    }
}

/// A signed write submitted to a replica.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: VersionedKey,
    pub record: VersionedRecord,
    pub put_if_absent: bool,
    pub public_key: PublicKey,
    pub signature: Signature,
}

#[derive(Serialize)]
struct PutSigningFields<'a> {
    tag: &'static str,
    key: &'a VersionedKey,
    based_on: &'a VersionKey,
    payload_hash: [u8; 32],
    ttl_secs: u64,
    rekey: Option<[u8; 32]>,
    put_if_absent: bool,
}

impl PutRequest {
    /// Build a request signed by `keys`.
    pub fn signed(
        key: VersionedKey,
        record: VersionedRecord,
        put_if_absent: bool,
        keys: &ProtectionKeys,
    ) -> StoreResult<Self> {
        let message = put_message(&key, &record, put_if_absent)?;
        Ok(Self {
            key,
            record,
            put_if_absent,
            public_key: keys.public_key(),
            signature: keys.sign(&message),
        })
    }

    /// Build a protection-key change for `triple`, signed by the current owner.
    pub fn change_protection(
        triple: KeyTriple,
        current: &ProtectionKeys,
        new_owner: PublicKey,
    ) -> StoreResult<Self> {
        Self::signed(
            triple.at(VersionKey::ZERO),
            VersionedRecord::protection_change(new_owner),
            false,
            current,
        )
    }

    /// Returns `true` if the signature matches the presented public key.
    pub fn verify_signature(&self) -> StoreResult<bool> {
        let message = put_message(&self.key, &self.record, self.put_if_absent)?;
        Ok(self.public_key.verify(&message, &self.signature).is_ok())
    }
}

fn put_message(key: &VersionedKey, record: &VersionedRecord, put_if_absent: bool) -> StoreResult<Vec<u8>> {
    let fields = PutSigningFields {
        tag: "put",
        key,
        based_on: &record.based_on,
        payload_hash: *record.content_hash().as_bytes(),
        ttl_secs: record.ttl_secs,
        rekey: record.rekey.map(|k| k.to_bytes()),
        put_if_absent,
    };
    let encoded = bincode::serialize(&fields)?;
    Ok(ContentHasher::REQUEST.hash(&encoded).as_bytes().to_vec())
}

/// A signed removal of one revision, or of a whole triple when `version`
/// is `None`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub triple: KeyTriple,
    pub version: Option<VersionKey>,
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl RemoveRequest {
    pub fn signed(
        triple: KeyTriple,
        version: Option<VersionKey>,
        keys: &ProtectionKeys,
    ) -> StoreResult<Self> {
        let message = remove_message(&triple, &version)?;
        Ok(Self {
            triple,
            version,
            public_key: keys.public_key(),
            signature: keys.sign(&message),
        })
    }

    pub fn verify_signature(&self) -> StoreResult<bool> {
        let message = remove_message(&self.triple, &self.version)?;
        Ok(self.public_key.verify(&message, &self.signature).is_ok())
    }
}

fn remove_message(triple: &KeyTriple, version: &Option<VersionKey>) -> StoreResult<Vec<u8>> {
    let encoded = bincode::serialize(&("remove", triple, version))?;
    Ok(ContentHasher::REQUEST.hash(&encoded).as_bytes().to_vec())
}

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
