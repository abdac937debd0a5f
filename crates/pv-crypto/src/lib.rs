//! Cryptographic primitives for PeerVault.
//!
//! Provides domain-separated BLAKE3 content hashing and the Ed25519
//! protection keys that authorize writes and removals on replicas.
//!
//! All crypto operations wrap established libraries (blake3, ed25519-dalek).

pub mod hasher;
pub mod signer;

pub use hasher::{ContentHash, ContentHasher};
pub use signer::{ProtectionKeys, PublicKey, Signature, SignatureError};
