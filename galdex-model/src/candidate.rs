use chrono::{DateTime, Utc};

use crate::error::ModelError;

/// Lifecycle of a scan candidate.
///
/// A candidate transitions at most once into a terminal status and is never
/// mutated after canonicalization references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CandidateStatus {
    Pending,
    Confirmed,
    Ignored,
    Rejected,
    Merged,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Confirmed => "confirmed",
            CandidateStatus::Ignored => "ignored",
            CandidateStatus::Rejected => "rejected",
            CandidateStatus::Merged => "merged",
        }
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(CandidateStatus::Pending),
            "confirmed" => Ok(CandidateStatus::Confirmed),
            "ignored" => Ok(CandidateStatus::Ignored),
            "rejected" => Ok(CandidateStatus::Rejected),
            "merged" => Ok(CandidateStatus::Merged),
            other => Err(ModelError::UnknownVariant {
                kind: "candidate status",
                value: other.to_string(),
            }),
        }
    }
}

/// Detection result pending library confirmation. Evidence, never truth.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanCandidate {
    /// Database rowid; `None` before first insert.
    pub id: Option<i64>,
    /// Unique folder path this candidate was detected at.
    pub path: String,
    pub detected_title: String,
    pub detected_engine: Option<String>,
    /// Multi-factor detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Indicator tags found in the folder, e.g. `has_executable`.
    pub indicators: Vec<String>,
    pub status: CandidateStatus,
    pub detected_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Title override entered by the user during review.
    pub manual_correction: Option<String>,
}

impl ScanCandidate {
    pub fn new(
        path: String,
        detected_title: String,
        detected_engine: Option<String>,
        confidence: f64,
        indicators: Vec<String>,
    ) -> Self {
        ScanCandidate {
            id: None,
            path,
            detected_title,
            detected_engine,
            confidence,
            indicators,
            status: CandidateStatus::Pending,
            detected_at: Utc::now(),
            confirmed_at: None,
            manual_correction: None,
        }
    }

    /// Title shown in review workflows, honoring a manual correction.
    pub fn effective_title(&self) -> &str {
        self.manual_correction
            .as_deref()
            .unwrap_or(&self.detected_title)
    }
}

/// Lifecycle of an identity match candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MatchStatus {
    Pending,
    Accepted,
    Canonicalized,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Canonicalized => "canonicalized",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(MatchStatus::Pending),
            "accepted" => Ok(MatchStatus::Accepted),
            "canonicalized" => Ok(MatchStatus::Canonicalized),
            "rejected" => Ok(MatchStatus::Rejected),
            other => Err(ModelError::UnknownVariant {
                kind: "match status",
                value: other.to_string(),
            }),
        }
    }
}

/// External-catalog hypothesis for a detected folder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentityMatchCandidate {
    pub id: Option<i64>,
    pub path: String,
    pub detected_title: String,
    pub detected_engine: Option<String>,
    pub confidence: f64,
    /// Catalog that produced this hypothesis, e.g. `vndb`.
    pub external_source_type: Option<String>,
    /// Catalog-side identifier, e.g. `v12345`.
    pub external_source_id: Option<String>,
    pub status: MatchStatus,
    pub detected_at: DateTime<Utc>,
    pub canonicalized_at: Option<DateTime<Utc>>,
}

/// One catalog lookup result, as handed back by the catalog adapter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentityHypothesis {
    pub source_type: String,
    pub external_id: String,
    pub title: String,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}
