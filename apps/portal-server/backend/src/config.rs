//! Application configuration.

use std::path::PathBuf;

use clap::Parser;
use types_rs::ElectionDefinition;
use url::Url;

const ONE_MB: usize = 1024 * 1024;

pub const MAX_REQUEST_SIZE: usize = ONE_MB;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Log level.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,

    /// Access code that admins exchange for a session. Can be changed at
    /// runtime; the change is not persisted.
    #[arg(long, env = "ADMIN_ACCESS_CODE")]
    pub admin_access_code: String,

    /// JSON file describing the election and its candidates. The built-in
    /// student council election is used when omitted.
    #[arg(long, env = "ELECTION_FILE")]
    pub election_file: Option<PathBuf>,

    /// Number of voting tokens to mint at startup.
    #[arg(long, env = "INITIAL_TOKENS", default_value_t = 300)]
    pub initial_tokens: usize,

    /// Largest number of tokens a single generation request may mint.
    #[arg(long, env = "MAX_TOKENS_PER_BATCH", default_value_t = voting_core::token_store::DEFAULT_MAX_BATCH)]
    pub max_tokens_per_batch: usize,

    /// Base URL of the text generation service.
    #[arg(long, env = "GENAI_URL", default_value = genai_client::DEFAULT_BASE_URL)]
    pub genai_url: Url,

    /// Model used for text generation.
    #[arg(long, env = "GENAI_MODEL", default_value = genai_client::DEFAULT_MODEL)]
    pub genai_model: String,

    /// API key for the text generation service. AI drafting is disabled
    /// without one.
    #[arg(long, env = "GENAI_API_KEY")]
    pub genai_api_key: Option<String>,
}

impl Config {
    pub fn load_election(&self) -> color_eyre::Result<ElectionDefinition> {
        match &self.election_file {
            Some(path) => {
                tracing::info!("loading election from {}", path.display());
                ElectionDefinition::from_file(path)
            }
            None => crate::seed::builtin_election(),
        }
    }

    pub fn genai_client(&self) -> Option<genai_client::Client> {
        let Some(api_key) = &self.genai_api_key else {
            tracing::warn!("GENAI_API_KEY not set, AI drafting is disabled");
            return None;
        };
        Some(genai_client::Client::new(
            self.genai_url.clone(),
            &self.genai_model,
            api_key,
        ))
    }
}
