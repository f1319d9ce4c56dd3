use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{election::CandidateId, token::TokenId};

/// Vote counts keyed by candidate.
pub type Totals = BTreeMap<CandidateId, u64>;

/// One entry of the append-only vote ledger. The id is the redeemed token's
/// id, so there is at most one record per token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub id: TokenId,
    pub candidate_id: CandidateId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
}
