use types_rs::{CandidateId, TokenId};

/// Error type for voting operations. Every variant is recoverable and is
/// returned to the immediate caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Election is not active")]
    ElectionNotActive,

    #[error("Token not found: {0}")]
    TokenNotFound(TokenId),

    #[error("Token already used: {0}")]
    TokenAlreadyUsed(TokenId),

    #[error("Candidate not found: {0}")]
    CandidateNotFound(CandidateId),

    #[error("Duplicate vote id: {0}")]
    DuplicateVoteId(TokenId),

    #[error("Token count must be between 1 and {max}, got {requested}")]
    GenerationBoundsExceeded { requested: usize, max: usize },

    #[error("Candidate roster cannot change while the election is active")]
    RosterLocked,

    #[error("Candidate {0} already has votes and cannot be removed")]
    CandidateHasVotes(CandidateId),

    #[error("No candidate ids left")]
    CandidateIdsExhausted,
}

impl Error {
    /// Stable name of the error kind, for callers that map errors to their
    /// own messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ElectionNotActive => "ElectionNotActive",
            Self::TokenNotFound(_) => "TokenNotFound",
            Self::TokenAlreadyUsed(_) => "TokenAlreadyUsed",
            Self::CandidateNotFound(_) => "CandidateNotFound",
            Self::DuplicateVoteId(_) => "DuplicateVoteId",
            Self::GenerationBoundsExceeded { .. } => "GenerationBoundsExceeded",
            Self::RosterLocked => "RosterLocked",
            Self::CandidateHasVotes(_) => "CandidateHasVotes",
            Self::CandidateIdsExhausted => "CandidateIdsExhausted",
        }
    }
}

/// Result type for voting operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
