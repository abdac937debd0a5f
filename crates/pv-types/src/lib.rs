//! Foundation types for PeerVault.
//!
//! Every record in the network is addressed by four hashes: a location
//! (whose data), a domain (which namespace), a content key (which record)
//! and a version key (which revision of that record). This crate defines
//! those addresses; every other PeerVault crate depends on `pv-types`.
//!
//! # Key Types
//!
//! - [`KeyHash`]: 32-byte BLAKE3 hash used for location, domain and content
//! - [`VersionKey`]: revision identifier with an embedded millisecond timestamp
//! - [`KeyTriple`]: (location, domain, content); the unit of version history
//! - [`VersionedKey`]: a [`KeyTriple`] plus a [`VersionKey`]

pub mod error;
pub mod key;
pub mod version;

pub use error::TypeError;
pub use key::{KeyHash, KeyTriple, VersionedKey};
pub use version::VersionKey;
