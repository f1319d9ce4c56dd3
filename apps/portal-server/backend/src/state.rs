use std::sync::Arc;

use tokio::sync::Mutex;
use voting_core::VoteCoordinator;

use crate::session::SessionManager;

/// Contains the application state, used by request handlers.
#[derive(Debug, Clone)]
pub(crate) struct AppState {
    /// Tokens, tally and election gate.
    pub coordinator: Arc<VoteCoordinator>,

    /// In-memory admin session manager.
    pub sessions: Arc<Mutex<SessionManager>>,

    /// Text generation client, absent when no API key is configured.
    pub genai: Option<Arc<genai_client::Client>>,
}
