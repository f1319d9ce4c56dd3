//! The vote coordinator: the only path by which a vote reaches the tally.
//!
//! [`VoteCoordinator::cast_vote`] redeems the token and records the vote as
//! one unit. If the tally rejects the vote after the token has been redeemed,
//! the redemption is rolled back before the error is returned, so a failed
//! vote never consumes a token. The token's lock is held across the whole
//! sequence, which means no other caller can observe the intermediate state.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;
use types_rs::{
    Candidate, CandidateId, CandidateProfile, ElectionDefinition, ElectionDetails, Token,
    TokenId, TokenStatus, Totals, VoteRecord,
};

use crate::{
    error::{Error, Result},
    tally::{BallotTally, Tally},
    token_store::{self, TokenExport, TokenStats, TokenStore},
};

/// A successfully cast vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voted {
    pub vote: VoteRecord,
}

/// Election details together with the current roster and counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionSnapshot {
    #[serde(flatten)]
    pub details: ElectionDetails,
    pub candidates: Vec<Candidate>,
    pub total_votes: u64,
}

/// Result of cross-checking the token store against the tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Sum of every candidate's vote count.
    pub total_votes: u64,
    pub ledger_entries: usize,
    pub used_tokens: usize,
    /// Ledger entries whose id is not a used token.
    pub orphan_votes: Vec<TokenId>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.total_votes == self.ledger_entries as u64
            && self.ledger_entries == self.used_tokens
            && self.orphan_votes.is_empty()
    }
}

pub struct VoteCoordinator<T = Tally> {
    /// Held for reading by every vote and roster change, and for writing when
    /// the voting gate changes, so the gate cannot flip mid-vote.
    election: RwLock<ElectionDetails>,
    tokens: TokenStore,
    tally: T,
}

impl<T> std::fmt::Debug for VoteCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteCoordinator")
            .field("election", &self.election)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl VoteCoordinator<Tally> {
    /// Creates a coordinator for an election definition, with an empty token
    /// store.
    pub fn from_definition(definition: ElectionDefinition, tokens: TokenStore) -> Self {
        Self::new(definition.details, tokens, Tally::new(definition.candidates))
    }
}

impl<T: BallotTally> VoteCoordinator<T> {
    pub fn new(details: ElectionDetails, tokens: TokenStore, tally: T) -> Self {
        Self {
            election: RwLock::new(details),
            tokens,
            tally,
        }
    }

    /// Casts a vote for `candidate_id` using the one-time token `token`.
    ///
    /// The token is trimmed and compared case-insensitively.
    ///
    /// # Errors
    ///
    /// - [`Error::ElectionNotActive`] when voting is closed. The token store
    ///   is not consulted.
    /// - [`Error::TokenNotFound`] or [`Error::TokenAlreadyUsed`] from the
    ///   token store.
    /// - [`Error::CandidateNotFound`] or [`Error::DuplicateVoteId`] from the
    ///   tally, in which case the token is returned to the active state.
    pub fn cast_vote(&self, candidate_id: CandidateId, token: &str) -> Result<Voted> {
        let election = self.election.read();
        if !election.is_active {
            tracing::warn!("rejected vote for candidate {candidate_id}: election not active");
            return Err(Error::ElectionNotActive);
        }

        let token_id = TokenId::new(token);
        let result = self.tokens.with_token(&token_id, |token| {
            let used_at = token_store::redeem_token(token, OffsetDateTime::now_utc())?;
            match self
                .tally
                .record_vote(candidate_id, token_id.clone(), used_at)
            {
                Ok(vote) => Ok(Voted { vote }),
                Err(e) => {
                    token_store::release_token(token);
                    tracing::warn!("rolled back redemption of token {token_id}: {e}");
                    Err(e)
                }
            }
        });
        drop(election);

        match &result {
            Ok(_) => tracing::info!("recorded vote for candidate {candidate_id}"),
            Err(e) => tracing::warn!("rejected vote for candidate {candidate_id}: {e}"),
        }
        result
    }

    pub fn is_active(&self) -> bool {
        self.election.read().is_active
    }

    /// Opens or closes voting. Waits for votes already in progress.
    pub fn set_active(&self, is_active: bool) -> ElectionDetails {
        let mut election = self.election.write();
        if election.is_active != is_active {
            tracing::info!(
                "election {}",
                if is_active { "opened" } else { "closed" }
            );
        }
        election.is_active = is_active;
        election.clone()
    }

    pub fn election(&self) -> ElectionSnapshot {
        let details = self.election.read().clone();
        let candidates = self.tally.candidates();
        let total_votes = candidates.iter().map(|candidate| candidate.votes).sum();
        ElectionSnapshot {
            details,
            candidates,
            total_votes,
        }
    }

    /// Adds a candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RosterLocked`] while the election is active, or
    /// [`Error::CandidateIdsExhausted`] once the highest id is taken.
    pub fn add_candidate(&self, profile: CandidateProfile) -> Result<Candidate> {
        let election = self.election.read();
        if election.is_active {
            return Err(Error::RosterLocked);
        }
        let candidate = self.tally.add_candidate(profile)?;
        tracing::info!("added candidate {}", candidate.id);
        Ok(candidate)
    }

    /// Replaces a candidate's profile. Vote counts are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RosterLocked`] while the election is active, or
    /// [`Error::CandidateNotFound`].
    pub fn update_candidate(&self, id: CandidateId, profile: CandidateProfile) -> Result<Candidate> {
        let election = self.election.read();
        if election.is_active {
            return Err(Error::RosterLocked);
        }
        self.tally.update_candidate(id, profile)
    }

    /// Removes a candidate without votes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RosterLocked`] while the election is active,
    /// [`Error::CandidateNotFound`], or [`Error::CandidateHasVotes`].
    pub fn remove_candidate(&self, id: CandidateId) -> Result<Candidate> {
        let election = self.election.read();
        if election.is_active {
            return Err(Error::RosterLocked);
        }
        let candidate = self.tally.remove_candidate(id)?;
        tracing::info!("removed candidate {id}");
        Ok(candidate)
    }

    pub fn generate_tokens(&self, count: usize) -> Result<Vec<Token>> {
        self.tokens.generate(count)
    }

    pub fn delete_unused_tokens(&self) -> usize {
        self.tokens.delete_unused()
    }

    pub fn token_export(&self) -> TokenExport<'_> {
        self.tokens.export()
    }

    pub fn token_stats(&self) -> TokenStats {
        self.tokens.stats()
    }

    pub fn totals(&self) -> Totals {
        self.tally.totals()
    }

    pub fn history(&self) -> Vec<VoteRecord> {
        self.tally.history()
    }

    pub fn token(&self, id: &TokenId) -> Option<Token> {
        self.tokens.get(id)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Largest batch [`Self::generate_tokens`] accepts.
    pub const fn max_token_batch(&self) -> usize {
        self.tokens.max_batch()
    }

    pub const fn tally(&self) -> &T {
        &self.tally
    }

    /// Cross-checks the token store against the tally. Votes are paused for
    /// the duration so the two stores are read at a consistent point.
    pub fn verify_integrity(&self) -> IntegrityReport {
        let _election = self.election.write();

        let total_votes = self.tally.totals().values().sum();
        let history = self.tally.history();
        let used: HashSet<TokenId> = self
            .tokens
            .export()
            .iter()
            .filter(|row| row.status == TokenStatus::Used)
            .map(|row| row.id)
            .collect();
        let orphan_votes = history
            .iter()
            .filter(|record| !used.contains(&record.id))
            .map(|record| record.id.clone())
            .collect();

        let report = IntegrityReport {
            total_votes,
            ledger_entries: history.len(),
            used_tokens: used.len(),
            orphan_votes,
        };
        if !report.is_consistent() {
            tracing::error!("vote integrity check failed: {report:?}");
        }
        report
    }
}
