//! Data types shared by the voting core and the portal server.

pub mod election;
pub mod token;
pub mod votes;

pub use election::{
    Candidate, CandidateId, CandidateProfile, ElectionDefinition, ElectionDetails, RosterEntry,
};
pub use token::{Token, TokenId, TokenStatus};
pub use votes::{Totals, VoteRecord};
