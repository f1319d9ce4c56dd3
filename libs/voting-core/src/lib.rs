//! Token-gated vote casting: the token store, the ballot tally, and the
//! coordinator that ties a token redemption to exactly one vote.

pub mod coordinator;
pub mod error;
pub mod report;
pub mod tally;
pub mod token_store;

pub use coordinator::{ElectionSnapshot, IntegrityReport, VoteCoordinator, Voted};
pub use error::{Error, Result};
pub use tally::{BallotTally, Tally};
pub use token_store::{ExportRow, TokenExport, TokenStats, TokenStore};
