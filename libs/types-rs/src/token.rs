use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifier of a one-time voting token.
///
/// Token lookups are case-insensitive, so the inner value is always trimmed
/// and uppercased. Every way of building a `TokenId`, including
/// deserialization, goes through that normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct TokenId(String);

impl TokenId {
    /// Number of characters in a minted token.
    pub const LENGTH: usize = 6;

    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id has the shape of a minted token, i.e. exactly
    /// [`TokenId::LENGTH`] ASCII alphanumerics.
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LENGTH && self.0.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

impl From<String> for TokenId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Used,
}

impl Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Used => f.write_str("used"),
        }
    }
}

/// A voting token and its redemption state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: TokenId,
    pub status: TokenStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub used_at: Option<time::OffsetDateTime>,
}

impl Token {
    /// Creates a fresh, unredeemed token.
    pub const fn new(id: TokenId, created_at: time::OffsetDateTime) -> Self {
        Self {
            id,
            status: TokenStatus::Active,
            created_at,
            used_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }
}
