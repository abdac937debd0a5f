use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-replica verdict on a put, produced by the storage validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PutOutcome {
    Accepted,
    /// `put_if_absent` was requested and the revision already exists.
    RejectedNotAbsent,
    /// Bad signature or the presenter does not own the triple.
    RejectedSecurity,
    RejectedGeneric,
    /// The writer did not build on the current head.
    VersionConflict,
    /// An unversioned write against an already-versioned record.
    VersionConflictMissingVersionKey,
    /// A second root against a non-empty chain.
    VersionConflictMissingBasedOn,
    /// A logically older revision arriving after a newer one.
    VersionConflictStaleTimestamp,
}

impl PutOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Any of the four version-related rejections.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict
                | Self::VersionConflictMissingVersionKey
                | Self::VersionConflictMissingBasedOn
                | Self::VersionConflictStaleTimestamp
        )
    }

    /// Rejections caused by a malformed version reference rather than a race.
    pub fn is_malformed_version(&self) -> bool {
        matches!(
            self,
            Self::VersionConflictMissingVersionKey | Self::VersionConflictMissingBasedOn
        )
    }
}

impl fmt::Display for PutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::RejectedNotAbsent => "rejected: not absent",
            Self::RejectedSecurity => "rejected: security",
            Self::RejectedGeneric => "rejected",
            Self::VersionConflict => "version conflict",
            Self::VersionConflictMissingVersionKey => "version conflict: missing version key",
            Self::VersionConflictMissingBasedOn => "version conflict: missing based-on key",
            Self::VersionConflictStaleTimestamp => "version conflict: stale timestamp",
        };
        f.write_str(s)
    }
}

/// Per-replica verdict on a removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    RejectedSecurity,
}
