use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ParticipantId;

/// How attempt records are attributed to a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantMatching {
    /// Trimmed names must be identical.
    #[default]
    Exact,
    /// Case-insensitive substring containment in either direction.
    ///
    /// Kept for records written by older clients that stored free-typed
    /// names. It over-matches: "Ana" also claims the records of "Ana Maria"
    /// and "Diana".
    LegacyFuzzy,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown participant matching mode: {0} (expected `exact` or `legacy-fuzzy`)")]
pub struct ParseMatchingError(pub String);

impl ParticipantMatching {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantMatching::Exact => "exact",
            ParticipantMatching::LegacyFuzzy => "legacy-fuzzy",
        }
    }

    /// True if a record written by `recorded` belongs to `participant`.
    #[must_use]
    pub fn matches(self, participant: &ParticipantId, recorded: &ParticipantId) -> bool {
        match self {
            ParticipantMatching::Exact => participant == recorded,
            ParticipantMatching::LegacyFuzzy => {
                let wanted = participant.as_str().to_lowercase();
                let found = recorded.as_str().to_lowercase();
                found.contains(&wanted) || wanted.contains(&found)
            }
        }
    }
}

impl fmt::Display for ParticipantMatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantMatching {
    type Err = ParseMatchingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "legacy-fuzzy" | "legacy_fuzzy" | "fuzzy" => Ok(Self::LegacyFuzzy),
            other => Err(ParseMatchingError(other.to_string())),
        }
    }
}
