use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(u32);

impl CandidateId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for CandidateId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The editable, display-only part of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    pub name: String,
    pub vision: String,
    pub mission: String,
    pub photo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl CandidateProfile {
    /// Returns the name of the first required field that is blank, if any.
    /// Only `bio` may be left empty.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("vision", &self.vision),
            ("mission", &self.mission),
            ("photoUrl", &self.photo_url),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: CandidateId,
    #[serde(flatten)]
    pub profile: CandidateProfile,
    pub votes: u64,
}

/// A candidate as listed in an election definition. Vote counts are never
/// part of the configuration; every candidate starts at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: CandidateId,
    #[serde(flatten)]
    pub profile: CandidateProfile,
}

/// Descriptive metadata and the voting gate of an election event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionDetails {
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: time::OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: time::OffsetDateTime,
    pub is_active: bool,
}

/// An election event as supplied by configuration: details plus the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionDefinition {
    #[serde(flatten)]
    pub details: ElectionDetails,
    pub candidates: Vec<RosterEntry>,
}

impl FromStr for ElectionDefinition {
    type Err = serde_json::Error;

    fn from_str(election_data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(election_data)
    }
}

impl ElectionDefinition {
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> color_eyre::Result<Self> {
        let election_data = std::fs::read_to_string(path)?;
        Self::from_str(&election_data).map_err(Into::into)
    }
}
