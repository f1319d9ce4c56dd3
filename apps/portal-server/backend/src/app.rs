//! Application definition, including all HTTP route handlers.
//!
//! Route handlers are bundled via [`setup`] into an [`axum::Router`], which can then be run
//! using [`run`] at the configured port (see [`config`][`super::config`]).
//!
//! Routes under `/api/admin` other than `/api/admin/sessions` require a bearer
//! token obtained by exchanging the admin access code.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use genai_client::Aspiration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::Level;
use types_rs::{Candidate, CandidateId, CandidateProfile, ElectionDetails, TokenId, VoteRecord};
use voting_core::{
    report::{self, TrendPoint},
    ElectionSnapshot, ExportRow, IntegrityReport, TokenStats, VoteCoordinator, Voted,
};

use crate::{
    config::{Config, MAX_REQUEST_SIZE},
    session::{Session, SessionManager},
    state::AppState,
};

/// Prepares the application to be run within an HTTP server.
///
/// Run the application with [`run`] with the result of this function.
pub fn setup(
    coordinator: VoteCoordinator,
    admin_access_code: String,
    genai: Option<genai_client::Client>,
) -> Router {
    let _entered = tracing::span!(Level::DEBUG, "Setting up application").entered();
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/election", get(get_election))
        .route("/api/votes", post(cast_vote))
        .route(
            "/api/admin/sessions",
            post(create_session).delete(delete_session),
        )
        .route("/api/admin/election/active", put(set_election_active))
        .route("/api/admin/candidates", post(add_candidate))
        .route(
            "/api/admin/candidates/:candidate_id",
            put(update_candidate).delete(remove_candidate),
        )
        .route("/api/admin/tokens", get(list_tokens).post(generate_tokens))
        .route("/api/admin/tokens/unused", delete(delete_unused_tokens))
        .route("/api/admin/tokens/export.csv", get(export_tokens_csv))
        .route("/api/admin/tokens/stats", get(get_token_stats))
        .route("/api/admin/votes", get(list_votes))
        .route("/api/admin/votes/trend", get(get_vote_trend))
        .route("/api/admin/integrity", get(get_integrity))
        .route("/api/admin/access-code", put(change_access_code))
        .route("/api/admin/news/draft", post(draft_news))
        .route(
            "/api/admin/aspirations/categorize",
            post(categorize_aspirations),
        )
        .route("/api/admin/aspirations/themes", post(summarize_aspiration_themes))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            coordinator: Arc::new(coordinator),
            sessions: Arc::new(Mutex::new(SessionManager::new(admin_access_code))),
            genai: genai.map(Arc::new),
        })
}

/// Create and run an HTTP server using the provided application at the port
/// from [`config`][`super::config`].
pub async fn run(app: Router, config: &Config) -> color_eyre::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    tracing::info!("Server listening at http://{addr}/");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Always responds with a successful status. Used to check whether the server
/// is running.
async fn get_status() -> impl IntoResponse {
    StatusCode::OK
}

async fn get_election(
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<ElectionSnapshot> {
    Json(coordinator.election())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastVoteRequest {
    candidate_id: CandidateId,
    token: String,
}

async fn cast_vote(
    State(AppState { coordinator, .. }): State<AppState>,
    Json(CastVoteRequest {
        candidate_id,
        token,
    }): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, Error> {
    if !TokenId::new(&token).is_well_formed() {
        return Err(Error::BadRequest {
            kind: "InvalidToken",
            message: format!(
                "Token must be {} letters or digits",
                TokenId::LENGTH
            ),
        });
    }

    let voted: Voted = coordinator.cast_vote(candidate_id, &token)?;
    Ok((StatusCode::CREATED, Json(voted)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    access_code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    bearer_token: String,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: time::OffsetDateTime,
}

async fn create_session(
    State(AppState { sessions, .. }): State<AppState>,
    Json(CreateSessionRequest { access_code }): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, Error> {
    let mut sessions = sessions.lock().await;
    let Some(session) = sessions.login(&access_code) else {
        return Err(Error::InvalidAccessCode);
    };
    tracing::info!("admin session created");

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            bearer_token: session.token().to_string(),
            expires_at: session.expiration(),
        }),
    ))
}

async fn delete_session(
    session: Session,
    State(AppState { sessions, .. }): State<AppState>,
) -> StatusCode {
    sessions.lock().await.logout(session.token());
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetActiveRequest {
    is_active: bool,
}

async fn set_election_active(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
    Json(SetActiveRequest { is_active }): Json<SetActiveRequest>,
) -> Json<ElectionDetails> {
    Json(coordinator.set_active(is_active))
}

fn validate_profile(profile: &CandidateProfile) -> Result<(), Error> {
    match profile.missing_field() {
        Some(field) => Err(Error::BadRequest {
            kind: "InvalidCandidate",
            message: format!("Candidate {field} must not be blank"),
        }),
        None => Ok(()),
    }
}

/// Maps a missing candidate to 404 for routes that address it by path.
fn roster_error(error: voting_core::Error) -> Error {
    match error {
        voting_core::Error::CandidateNotFound(_) => Error::NotFound(error.to_string()),
        error => Error::Voting(error),
    }
}

async fn add_candidate(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
    Json(profile): Json<CandidateProfile>,
) -> Result<impl IntoResponse, Error> {
    validate_profile(&profile)?;
    let candidate = coordinator.add_candidate(profile)?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

async fn update_candidate(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
    Path(candidate_id): Path<u32>,
    Json(profile): Json<CandidateProfile>,
) -> Result<Json<Candidate>, Error> {
    validate_profile(&profile)?;
    coordinator
        .update_candidate(CandidateId::new(candidate_id), profile)
        .map(Json)
        .map_err(roster_error)
}

async fn remove_candidate(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
    Path(candidate_id): Path<u32>,
) -> Result<Json<Candidate>, Error> {
    coordinator
        .remove_candidate(CandidateId::new(candidate_id))
        .map(Json)
        .map_err(roster_error)
}

#[derive(Debug, Deserialize)]
struct GenerateTokensRequest {
    count: i64,
}

async fn generate_tokens(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
    Json(GenerateTokensRequest { count }): Json<GenerateTokensRequest>,
) -> Result<impl IntoResponse, Error> {
    let max = coordinator.max_token_batch();
    let Ok(count) = usize::try_from(count) else {
        return Err(Error::BadRequest {
            kind: "GenerationBoundsExceeded",
            message: format!("Token count must be between 1 and {max}, got {count}"),
        });
    };
    let tokens = coordinator.generate_tokens(count)?;
    Ok((StatusCode::CREATED, Json(json!({ "tokens": tokens }))))
}

async fn delete_unused_tokens(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> impl IntoResponse {
    let removed = coordinator.delete_unused_tokens();
    Json(json!({ "removed": removed }))
}

async fn list_tokens(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<Vec<ExportRow>> {
    let rows = coordinator.token_export().iter().collect();
    Json(rows)
}

async fn export_tokens_csv(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Result<impl IntoResponse, Error> {
    let csv = report::tokens_csv(coordinator.token_export().iter())
        .map_err(|e| Error::Other(e.into()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"voting-tokens.csv\"",
            ),
        ],
        csv,
    ))
}

async fn get_token_stats(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<TokenStats> {
    Json(coordinator.token_stats())
}

async fn list_votes(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<Vec<VoteRecord>> {
    Json(coordinator.history())
}

async fn get_vote_trend(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<Vec<TrendPoint>> {
    let candidates = coordinator.election().candidates;
    Json(report::hourly_trend(
        &coordinator.history(),
        candidates.iter().map(|candidate| candidate.id),
        time::OffsetDateTime::now_utc(),
    ))
}

async fn get_integrity(
    _session: Session,
    State(AppState { coordinator, .. }): State<AppState>,
) -> Json<IntegrityReport> {
    Json(coordinator.verify_integrity())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeAccessCodeRequest {
    access_code: String,
}

async fn change_access_code(
    _session: Session,
    State(AppState { sessions, .. }): State<AppState>,
    Json(ChangeAccessCodeRequest { access_code }): Json<ChangeAccessCodeRequest>,
) -> Result<StatusCode, Error> {
    if access_code.trim().is_empty() {
        return Err(Error::BadRequest {
            kind: "InvalidAccessCode",
            message: "Access code must not be blank".to_owned(),
        });
    }
    sessions.lock().await.change_access_code(access_code);
    tracing::info!("admin access code changed, all sessions ended");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DraftNewsRequest {
    points: String,
}

async fn draft_news(
    _session: Session,
    State(AppState { genai, .. }): State<AppState>,
    Json(DraftNewsRequest { points }): Json<DraftNewsRequest>,
) -> Result<impl IntoResponse, Error> {
    if points.trim().is_empty() {
        return Err(Error::BadRequest {
            kind: "InvalidPrompt",
            message: "Points must not be blank".to_owned(),
        });
    }
    let genai = require_genai(genai)?;
    let article = genai.draft_news_article(&points).await?;
    Ok(Json(json!({ "article": article })))
}

#[derive(Debug, Deserialize)]
struct AspirationsRequest {
    aspirations: Vec<Aspiration>,
}

fn require_genai(
    genai: Option<Arc<genai_client::Client>>,
) -> Result<Arc<genai_client::Client>, Error> {
    genai.ok_or_else(|| {
        Error::AiServiceUnavailable("no text generation service is configured".to_owned())
    })
}

async fn categorize_aspirations(
    _session: Session,
    State(AppState { genai, .. }): State<AppState>,
    Json(AspirationsRequest { aspirations }): Json<AspirationsRequest>,
) -> Result<impl IntoResponse, Error> {
    let genai = require_genai(genai)?;
    let aspirations = genai.categorize_aspirations(aspirations).await?;
    Ok(Json(json!({ "aspirations": aspirations })))
}

async fn summarize_aspiration_themes(
    _session: Session,
    State(AppState { genai, .. }): State<AppState>,
    Json(AspirationsRequest { aspirations }): Json<AspirationsRequest>,
) -> Result<impl IntoResponse, Error> {
    let genai = require_genai(genai)?;
    let themes = genai.summarize_aspiration_themes(&aspirations).await?;
    Ok(Json(json!({ "themes": themes })))
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Voting(#[from] voting_core::Error),

    #[error("{message}")]
    BadRequest { kind: &'static str, message: String },

    #[error("Invalid access code")]
    InvalidAccessCode,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("AI service unavailable: {0}")]
    AiServiceUnavailable(String),

    #[error("{0}")]
    Other(#[from] color_eyre::Report),
}

impl From<genai_client::Error> for Error {
    fn from(error: genai_client::Error) -> Self {
        Self::AiServiceUnavailable(error.to_string())
    }
}

impl Error {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        use voting_core::Error as Voting;

        match self {
            Self::Voting(e) => {
                let status = match e {
                    Voting::ElectionNotActive => StatusCode::FORBIDDEN,
                    Voting::TokenNotFound(_) => StatusCode::NOT_FOUND,
                    Voting::TokenAlreadyUsed(_)
                    | Voting::DuplicateVoteId(_)
                    | Voting::RosterLocked
                    | Voting::CandidateHasVotes(_)
                    | Voting::CandidateIdsExhausted => StatusCode::CONFLICT,
                    Voting::CandidateNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    Voting::GenerationBoundsExceeded { .. } => StatusCode::BAD_REQUEST,
                };
                (status, e.kind())
            }
            Self::BadRequest { kind, .. } => (StatusCode::BAD_REQUEST, *kind),
            Self::InvalidAccessCode => (StatusCode::UNAUTHORIZED, "InvalidAccessCode"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            Self::AiServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "AIServiceUnavailable")
            }
            Self::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match &self {
            // details stay in the log
            Self::AiServiceUnavailable(_) => "AI service is unavailable".to_owned(),
            error => error.to_string(),
        };
        let json = Json(json!({ "error": message, "kind": kind }));

        if status.is_server_error() {
            tracing::error!("Responding with error: {status} {self}");
        } else {
            tracing::warn!("Responding with error: {status} {json:?}");
        }
        (status, json).into_response()
    }
}
