use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use uuid::Uuid;

use crate::state::AppState;

/// An admin session kept in memory.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    /// The session token. This is meant to be opaque to the client.
    token: Uuid,

    /// The expiration time of the session.
    expiration: time::OffsetDateTime,
}

const SESSION_DURATION: time::Duration = time::Duration::minutes(15);

impl Session {
    fn new(now: time::OffsetDateTime) -> Self {
        Self {
            token: Uuid::new_v4(),
            expiration: now + SESSION_DURATION,
        }
    }

    fn is_expired_at(&self, now: time::OffsetDateTime) -> bool {
        now > self.expiration
    }

    pub(crate) const fn token(&self) -> Uuid {
        self.token
    }

    pub(crate) const fn expiration(&self) -> time::OffsetDateTime {
        self.expiration
    }
}

/// Holds the admin access code and the sessions issued for it.
#[derive(Debug)]
pub(crate) struct SessionManager {
    access_code: String,
    sessions: Vec<Session>,
}

impl SessionManager {
    pub(crate) fn new(access_code: impl Into<String>) -> Self {
        Self {
            access_code: access_code.into(),
            sessions: Vec::new(),
        }
    }

    /// Exchanges the access code for a new session. Returns `None` if the
    /// code does not match.
    pub(crate) fn login(&mut self, access_code: &str) -> Option<Session> {
        self.login_at(access_code, time::OffsetDateTime::now_utc())
    }

    fn login_at(&mut self, access_code: &str, now: time::OffsetDateTime) -> Option<Session> {
        if access_code != self.access_code {
            return None;
        }
        self.sessions.retain(|s| !s.is_expired_at(now));
        let session = Session::new(now);
        self.sessions.push(session.clone());
        Some(session)
    }

    /// Validates a session token and returns the session if it is valid.
    pub(crate) fn validate(&mut self, token: Uuid) -> Option<Session> {
        self.validate_at(token, time::OffsetDateTime::now_utc())
    }

    fn validate_at(&mut self, token: Uuid, now: time::OffsetDateTime) -> Option<Session> {
        self.sessions.retain(|s| !s.is_expired_at(now));
        self.sessions.iter().find(|s| s.token == token).cloned()
    }

    /// Ends the session with the given token, if any.
    pub(crate) fn logout(&mut self, token: Uuid) {
        self.sessions.retain(|s| s.token != token);
    }

    /// Replaces the access code. Every existing session ends.
    pub(crate) fn change_access_code(&mut self, access_code: impl Into<String>) {
        self.access_code = access_code.into();
        self.sessions.clear();
    }
}

/// Extracts a session from the request's authorization header, allowing request
/// methods to require a session by including `Session` in their signature.
#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        AppState { sessions, .. }: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        let token = Uuid::parse_str(bearer.token()).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let mut sessions = sessions.lock().await;
        if let Some(session) = sessions.validate(token) {
            tracing::debug!("authorized admin session");
            Ok(session)
        } else {
            tracing::warn!("unauthorized admin session: {token}");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
