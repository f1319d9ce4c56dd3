//! The ballot tally: per-candidate vote counters and the vote ledger.

use std::collections::HashSet;

use parking_lot::RwLock;
use time::OffsetDateTime;
use types_rs::{Candidate, CandidateId, CandidateProfile, RosterEntry, TokenId, Totals, VoteRecord};

use crate::error::{Error, Result};

/// Owner of vote counts and the append-only vote ledger.
///
/// `record_vote` is the only way counts change, and it updates the counter
/// and the ledger together so that `sum(totals) == history.len()` holds for
/// every observer.
#[cfg_attr(test, mockall::automock)]
pub trait BallotTally: Send + Sync {
    /// Appends a vote to the ledger and counts it for `candidate_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CandidateNotFound`] for an unknown candidate and
    /// [`Error::DuplicateVoteId`] if `vote_id` is already in the ledger.
    fn record_vote(
        &self,
        candidate_id: CandidateId,
        vote_id: TokenId,
        timestamp: OffsetDateTime,
    ) -> Result<VoteRecord>;

    fn totals(&self) -> Totals;

    /// The vote ledger in ascending timestamp order.
    fn history(&self) -> Vec<VoteRecord>;

    fn candidates(&self) -> Vec<Candidate>;

    /// Adds a candidate with the next free id and zero votes.
    fn add_candidate(&self, profile: CandidateProfile) -> Result<Candidate>;

    fn update_candidate(&self, id: CandidateId, profile: CandidateProfile) -> Result<Candidate>;

    /// Removes a candidate that has not received any votes.
    fn remove_candidate(&self, id: CandidateId) -> Result<Candidate>;
}

#[derive(Debug, Default)]
struct Ledger {
    candidates: Vec<Candidate>,
    records: Vec<VoteRecord>,
    vote_ids: HashSet<TokenId>,
}

impl Ledger {
    fn position(&self, id: CandidateId) -> Result<usize> {
        self.candidates
            .iter()
            .position(|candidate| candidate.id == id)
            .ok_or(Error::CandidateNotFound(id))
    }
}

/// In-memory [`BallotTally`].
#[derive(Debug, Default)]
pub struct Tally {
    ledger: RwLock<Ledger>,
}

impl Tally {
    /// Creates a tally for the given roster. Every candidate starts at zero
    /// votes; entries repeating an earlier id are ignored.
    pub fn new(roster: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut candidates: Vec<Candidate> = Vec::new();
        for RosterEntry { id, profile } in roster {
            if candidates.iter().any(|candidate| candidate.id == id) {
                tracing::warn!("ignoring duplicate roster entry for candidate {id}");
                continue;
            }
            candidates.push(Candidate {
                id,
                profile,
                votes: 0,
            });
        }

        Self {
            ledger: RwLock::new(Ledger {
                candidates,
                ..Ledger::default()
            }),
        }
    }
}

impl BallotTally for Tally {
    fn record_vote(
        &self,
        candidate_id: CandidateId,
        vote_id: TokenId,
        timestamp: OffsetDateTime,
    ) -> Result<VoteRecord> {
        let mut ledger = self.ledger.write();
        let position = ledger.position(candidate_id)?;
        if ledger.vote_ids.contains(&vote_id) {
            return Err(Error::DuplicateVoteId(vote_id));
        }

        let record = VoteRecord {
            id: vote_id.clone(),
            candidate_id,
            timestamp,
        };

        // keep the ledger sorted even if callers race with slightly skewed clocks
        let at = ledger
            .records
            .partition_point(|existing| existing.timestamp <= timestamp);
        ledger.records.insert(at, record.clone());
        ledger.vote_ids.insert(vote_id);
        ledger.candidates[position].votes += 1;

        debug_assert_eq!(
            ledger.candidates.iter().map(|c| c.votes).sum::<u64>(),
            ledger.records.len() as u64
        );

        Ok(record)
    }

    fn totals(&self) -> Totals {
        self.ledger
            .read()
            .candidates
            .iter()
            .map(|candidate| (candidate.id, candidate.votes))
            .collect()
    }

    fn history(&self) -> Vec<VoteRecord> {
        self.ledger.read().records.clone()
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.ledger.read().candidates.clone()
    }

    fn add_candidate(&self, profile: CandidateProfile) -> Result<Candidate> {
        let mut ledger = self.ledger.write();
        let id = match ledger.candidates.iter().map(|c| c.id.get()).max() {
            None => 1,
            Some(max) => max.checked_add(1).ok_or(Error::CandidateIdsExhausted)?,
        };
        let candidate = Candidate {
            id: CandidateId::new(id),
            profile,
            votes: 0,
        };
        ledger.candidates.push(candidate.clone());
        Ok(candidate)
    }

    fn update_candidate(&self, id: CandidateId, profile: CandidateProfile) -> Result<Candidate> {
        let mut ledger = self.ledger.write();
        let position = ledger.position(id)?;
        let candidate = &mut ledger.candidates[position];
        candidate.profile = profile;
        Ok(candidate.clone())
    }

    fn remove_candidate(&self, id: CandidateId) -> Result<Candidate> {
        let mut ledger = self.ledger.write();
        let position = ledger.position(id)?;
        if ledger.candidates[position].votes > 0 {
            return Err(Error::CandidateHasVotes(id));
        }
        Ok(ledger.candidates.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    fn profile(name: &str) -> CandidateProfile {
        CandidateProfile {
            name: name.to_owned(),
            vision: format!("{name}'s vision"),
            mission: format!("{name}'s mission"),
            photo_url: format!("https://example.com/{name}.png"),
            bio: None,
        }
    }

    fn tally() -> Tally {
        Tally::new([1, 2, 42].map(|id| RosterEntry {
            id: CandidateId::new(id),
            profile: profile(&format!("candidate-{id}")),
        }))
    }

    #[test]
    fn test_record_vote() {
        let tally = tally();
        let record = tally
            .record_vote(
                CandidateId::new(42),
                TokenId::new("X7F3Q1"),
                datetime!(2024-07-21 10:00 UTC),
            )
            .unwrap();

        assert_eq!(record.id, TokenId::new("X7F3Q1"));
        assert_eq!(tally.totals()[&CandidateId::new(42)], 1);
        assert_eq!(tally.totals()[&CandidateId::new(1)], 0);
        assert_eq!(tally.history(), vec![record]);
    }

    #[test]
    fn test_record_vote_unknown_candidate() {
        let tally = tally();
        assert_eq!(
            tally
                .record_vote(
                    CandidateId::new(7),
                    TokenId::new("X7F3Q1"),
                    OffsetDateTime::now_utc()
                )
                .unwrap_err(),
            Error::CandidateNotFound(CandidateId::new(7))
        );
        assert!(tally.history().is_empty());
        assert!(tally.totals().values().all(|votes| *votes == 0));
    }

    #[test]
    fn test_record_vote_duplicate_id() {
        let tally = tally();
        let now = OffsetDateTime::now_utc();
        tally
            .record_vote(CandidateId::new(1), TokenId::new("AAAAAA"), now)
            .unwrap();
        assert_eq!(
            tally
                .record_vote(CandidateId::new(2), TokenId::new("aaaaaa"), now)
                .unwrap_err(),
            Error::DuplicateVoteId(TokenId::new("AAAAAA"))
        );
        assert_eq!(tally.totals()[&CandidateId::new(2)], 0);
        assert_eq!(tally.history().len(), 1);
    }

    #[test]
    fn test_history_is_sorted_by_timestamp() {
        let tally = tally();
        for (id, at) in [
            ("AAAAAA", datetime!(2024-07-21 10:00 UTC)),
            ("BBBBBB", datetime!(2024-07-21 09:00 UTC)),
            ("CCCCCC", datetime!(2024-07-21 11:00 UTC)),
            ("DDDDDD", datetime!(2024-07-21 10:00 UTC)),
        ] {
            tally
                .record_vote(CandidateId::new(1), TokenId::new(id), at)
                .unwrap();
        }

        assert_eq!(
            tally
                .history()
                .iter()
                .map(|record| record.id.as_str())
                .collect::<Vec<_>>(),
            vec!["BBBBBB", "AAAAAA", "DDDDDD", "CCCCCC"]
        );
    }

    #[test]
    fn test_duplicate_roster_entries_are_ignored() {
        let tally = Tally::new([
            RosterEntry {
                id: CandidateId::new(1),
                profile: profile("first"),
            },
            RosterEntry {
                id: CandidateId::new(1),
                profile: profile("second"),
            },
        ]);
        let candidates = tally.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].profile.name, "first");
    }

    #[test]
    fn test_roster_management() {
        let tally = tally();

        let added = tally.add_candidate(profile("Bima")).unwrap();
        assert_eq!(added.id, CandidateId::new(43));
        assert_eq!(added.votes, 0);

        let updated = tally
            .update_candidate(CandidateId::new(43), profile("Bima Sakti"))
            .unwrap();
        assert_eq!(updated.profile.name, "Bima Sakti");
        assert_eq!(
            tally
                .update_candidate(CandidateId::new(99), profile("nobody"))
                .unwrap_err(),
            Error::CandidateNotFound(CandidateId::new(99))
        );

        tally
            .record_vote(
                CandidateId::new(43),
                TokenId::new("AAAAAA"),
                OffsetDateTime::now_utc(),
            )
            .unwrap();
        let updated = tally
            .update_candidate(CandidateId::new(43), profile("Bima"))
            .unwrap();
        assert_eq!(updated.votes, 1);

        assert_eq!(
            tally.remove_candidate(CandidateId::new(43)).unwrap_err(),
            Error::CandidateHasVotes(CandidateId::new(43))
        );
        assert_eq!(
            tally.remove_candidate(CandidateId::new(2)).unwrap().id,
            CandidateId::new(2)
        );
        assert_eq!(tally.candidates().len(), 3);
    }

    #[test]
    fn test_add_candidate_to_empty_roster() {
        let tally = Tally::default();
        assert_eq!(
            tally.add_candidate(profile("first")).unwrap().id,
            CandidateId::new(1)
        );
    }

    #[test]
    fn test_add_candidate_after_highest_id() {
        let tally = Tally::new([RosterEntry {
            id: CandidateId::new(u32::MAX),
            profile: profile("last"),
        }]);
        assert_eq!(
            tally.add_candidate(profile("overflow")).unwrap_err(),
            Error::CandidateIdsExhausted
        );
        assert_eq!(tally.candidates().len(), 1);
    }
}
