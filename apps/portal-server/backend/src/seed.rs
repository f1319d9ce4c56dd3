//! Startup state: the election definition and the initial batch of tokens.

use types_rs::ElectionDefinition;
use voting_core::{TokenStore, VoteCoordinator};

const BUILTIN_ELECTION: &str = include_str!("../data/election.json");

/// The student council election used when no election file is configured.
pub fn builtin_election() -> color_eyre::Result<ElectionDefinition> {
    Ok(BUILTIN_ELECTION.parse()?)
}

/// Builds the coordinator for `definition` and mints `initial_tokens` tokens.
/// Every candidate starts at zero votes.
pub fn build_coordinator(
    definition: ElectionDefinition,
    initial_tokens: usize,
    max_batch: usize,
) -> color_eyre::Result<VoteCoordinator> {
    let tokens = TokenStore::new(max_batch);
    let mut remaining = initial_tokens;
    while remaining > 0 {
        let batch = remaining.min(max_batch);
        tokens.generate(batch)?;
        remaining -= batch;
    }

    let coordinator = VoteCoordinator::from_definition(definition, tokens);
    let election = coordinator.election();
    tracing::info!(
        "seeded \"{}\" with {} candidates and {} tokens",
        election.details.title,
        election.candidates.len(),
        coordinator.token_count()
    );
    Ok(coordinator)
}
