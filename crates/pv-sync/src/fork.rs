use pv_store::{ChainDigest, VersionedRecord};
use pv_types::VersionKey;

/// Whether the caller's revision should be treated as canonical.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkResolution {
    IWin,
    ILose,
}

/// One replica digest's opinion of the caller's revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkVote {
    pub resolution: ForkResolution,
    /// The sibling that decided the vote, if one was found.
    pub rival: Option<VersionKey>,
}

/// Aggregate decision across every replica digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkDecision {
    pub resolution: ForkResolution,
    /// The first losing rival, or the first rival seen at all.
    pub rival: Option<VersionKey>,
    pub lose_votes: usize,
    /// Digests that expressed an opinion (non-empty ones).
    pub voters: usize,
}

impl ForkDecision {
    pub fn i_lose(&self) -> bool {
        self.resolution == ForkResolution::ILose
    }
}

/// Decides which of two racing siblings is canonical.
///
/// The tie-break is asymmetric: a sibling that is *older* than the caller's
/// revision beats it, while a newer sibling, or no sibling at all, lets the
/// caller proceed. An older concurrent write already recorded as current is
/// never overwritten by a later arrival built on a stale base.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForkDetector;

impl ForkDetector {
    pub fn new() -> Self {
        Self
    }

    /// Judge `mine` against one replica's digest. Empty digests abstain.
    pub fn judge(&self, mine: &VersionedRecord, digest: &ChainDigest) -> Option<ForkVote> {
        if digest.is_empty() {
            return None;
        }
        let win = |rival| {
            Some(ForkVote {
                resolution: ForkResolution::IWin,
                rival,
            })
        };

        let Some((next, next_based_on)) = digest.next_after(&mine.based_on) else {
            return win(None);
        };
        if next == mine.version {
            return win(None);
        }
        // The entry after our parent descends from something else: it is
        // not a sibling of ours.
        if next_based_on != mine.based_on {
            return win(None);
        }
        if next.timestamp_ms() < mine.version.timestamp_ms() {
            Some(ForkVote {
                resolution: ForkResolution::ILose,
                rival: Some(next),
            })
        } else {
            win(Some(next))
        }
    }

    /// Judge `mine` against every digest. The caller loses only when a
    /// strict majority of the non-empty digests vote against it.
    pub fn resolve<'a>(
        &self,
        mine: &VersionedRecord,
        digests: impl IntoIterator<Item = &'a ChainDigest>,
    ) -> ForkDecision {
        let mut voters = 0;
        let mut lose_votes = 0;
        let mut losing_rival = None;
        let mut any_rival = None;
        for vote in digests.into_iter().filter_map(|d| self.judge(mine, d)) {
            voters += 1;
            any_rival = any_rival.or(vote.rival);
            if vote.resolution == ForkResolution::ILose {
                lose_votes += 1;
                losing_rival = losing_rival.or(vote.rival);
            }
        }
        let resolution = if lose_votes * 2 > voters {
            ForkResolution::ILose
        } else {
            ForkResolution::IWin
        };
        ForkDecision {
            resolution,
            rival: losing_rival.or(any_rival),
            lose_votes,
            voters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> VersionedRecord {
        VersionedRecord::root("root", 1_000)
    }

    fn child(payload: &str, ts: u64, parent: &VersionedRecord) -> VersionedRecord {
        VersionedRecord::successor(payload.to_owned(), ts, parent.version)
    }

    fn digest(records: &[&VersionedRecord]) -> ChainDigest {
        ChainDigest::from_pairs(records.iter().map(|r| (r.version, r.based_on)))
    }

    #[test]
    fn empty_digest_abstains() {
        let r = root();
        let mine = child("a", 2_000, &r);
        assert_eq!(ForkDetector.judge(&mine, &ChainDigest::new()), None);
        let decision = ForkDetector.resolve(&mine, &[ChainDigest::new()]);
        assert_eq!(decision.resolution, ForkResolution::IWin);
        assert_eq!(decision.voters, 0);
    }

    #[test]
    fn own_revision_after_parent_wins() {
        let r = root();
        let mine = child("a", 2_000, &r);
        let vote = ForkDetector.judge(&mine, &digest(&[&r, &mine])).unwrap();
        assert_eq!(vote.resolution, ForkResolution::IWin);
    }

    #[test]
    fn nothing_after_parent_wins() {
        let r = root();
        let mine = child("a", 2_000, &r);
        let vote = ForkDetector.judge(&mine, &digest(&[&r])).unwrap();
        assert_eq!(vote, ForkVote { resolution: ForkResolution::IWin, rival: None });
    }

    #[test]
    fn older_sibling_beats_caller() {
        let r = root();
        let older = child("b", 2_000, &r);
        let mine = child("a", 3_000, &r);
        let vote = ForkDetector.judge(&mine, &digest(&[&r, &older])).unwrap();
        assert_eq!(vote.resolution, ForkResolution::ILose);
        assert_eq!(vote.rival, Some(older.version));
    }

    #[test]
    fn newer_sibling_does_not_block_caller() {
        let r = root();
        let mine = child("a", 2_000, &r);
        let newer = child("b", 3_000, &r);
        let vote = ForkDetector.judge(&mine, &digest(&[&r, &newer])).unwrap();
        assert_eq!(vote.resolution, ForkResolution::IWin);
        assert_eq!(vote.rival, Some(newer.version));
    }

    #[test]
    fn same_timestamp_sibling_is_inconclusive_and_caller_wins() {
        let r = root();
        let mine = child("a", 2_000, &r);
        let twin = child("b", 2_000, &r);
        let vote = ForkDetector.judge(&mine, &digest(&[&r, &twin])).unwrap();
        assert_eq!(vote.resolution, ForkResolution::IWin);
    }

    #[test]
    fn non_sibling_successor_is_only_a_parent_reference() {
        let r = root();
        let mine = child("a", 3_000, &r);
        // A digest where the entry after our parent hangs off another entry.
        let digest = ChainDigest::from_pairs([
            (r.version, VersionKey::ZERO),
            (VersionKey::new(2_000, b"x"), VersionKey::new(500, b"elsewhere")),
        ]);
        let vote = ForkDetector.judge(&mine, &digest).unwrap();
        assert_eq!(vote.resolution, ForkResolution::IWin);
    }

    #[test]
    fn competing_roots_use_the_same_rule() {
        let first = VersionedRecord::root("first", 1_000);
        let mine = VersionedRecord::root("second", 2_000);
        let vote = ForkDetector.judge(&mine, &digest(&[&first])).unwrap();
        assert_eq!(vote.resolution, ForkResolution::ILose);
    }

    #[test]
    fn caller_loses_only_on_strict_majority() {
        let r = root();
        let older = child("b", 2_000, &r);
        let mine = child("a", 3_000, &r);
        let losing = digest(&[&r, &older]);
        let winning = digest(&[&r, &mine]);

        let split = ForkDetector.resolve(&mine, [&losing, &winning]);
        assert_eq!(split.resolution, ForkResolution::IWin);
        assert_eq!(split.lose_votes, 1);
        assert_eq!(split.voters, 2);

        let majority = ForkDetector.resolve(&mine, [&losing, &losing, &winning]);
        assert!(majority.i_lose());
        assert_eq!(majority.rival, Some(older.version));

        let with_abstainer = ForkDetector.resolve(&mine, [&losing, &ChainDigest::new()]);
        assert!(with_abstainer.i_lose());
    }
}
