use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

pub const MAX_SPAM_SCORE: i32 = 100;

/// Inclusive upper bound of each band below definite
const LEGITIMATE_MAX: i32 = 25;
const WARNING_MAX: i32 = 50;
const LIKELY_MAX: i32 = 75;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpamError {
    #[error("Spam score {0} is outside 0..=100")]
    ScoreOutOfRange(i32),
}

/// A validated spam score in 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SpamScore(i32);

impl SpamScore {
    pub fn new(score: i32) -> Result<Self, SpamError> {
        if (0..=MAX_SPAM_SCORE).contains(&score) {
            Ok(Self(score))
        } else {
            Err(SpamError::ScoreOutOfRange(score))
        }
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn tier(self) -> SpamTier {
        SpamTier::from_score(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum SpamTier {
    Legitimate,
    Warning,
    Likely,
    Definite,
}

impl SpamTier {
    pub fn from_score(score: SpamScore) -> Self {
        match score.value() {
            s if s <= LEGITIMATE_MAX => SpamTier::Legitimate,
            s if s <= WARNING_MAX => SpamTier::Warning,
            s if s <= LIKELY_MAX => SpamTier::Likely,
            _ => SpamTier::Definite,
        }
    }

    /// Derived `is_spam` flag
    pub fn is_spam(self) -> bool {
        self >= SpamTier::Likely
    }

    pub fn badge(self) -> Option<SpamBadge> {
        match self {
            SpamTier::Legitimate => None,
            SpamTier::Warning => Some(SpamBadge {
                label: "Suspicious",
                icon: "⚡",
                color: BadgeColor::Yellow,
            }),
            SpamTier::Likely => Some(SpamBadge {
                label: "Likely Spam",
                icon: "⚠️",
                color: BadgeColor::Orange,
            }),
            SpamTier::Definite => Some(SpamBadge {
                label: "Spam",
                icon: "🚫",
                color: BadgeColor::Red,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    Yellow,
    Orange,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpamBadge {
    pub label: &'static str,
    pub icon: &'static str,
    pub color: BadgeColor,
}

impl std::fmt::Display for SpamBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.icon, self.label)
    }
}

/// What the UI shows for a contribution.
///
/// `NotAssessed` and a legitimate score both render no badge, but only an
/// assessed contribution has a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamIndicator {
    NotAssessed,
    Assessed { score: SpamScore, tier: SpamTier },
}

impl SpamIndicator {
    pub fn from_score(score: Option<i32>) -> Result<Self, SpamError> {
        match score {
            None => Ok(SpamIndicator::NotAssessed),
            Some(raw) => {
                let score = SpamScore::new(raw)?;
                Ok(SpamIndicator::Assessed {
                    score,
                    tier: score.tier(),
                })
            }
        }
    }

    pub fn tier(&self) -> Option<SpamTier> {
        match self {
            SpamIndicator::NotAssessed => None,
            SpamIndicator::Assessed { tier, .. } => Some(*tier),
        }
    }

    pub fn badge(&self) -> Option<SpamBadge> {
        self.tier().and_then(SpamTier::badge)
    }

    pub fn is_spam(&self) -> bool {
        self.tier().is_some_and(SpamTier::is_spam)
    }
}

/// Contribution list filter by spam tier. Unassessed contributions always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamFilter {
    #[default]
    All,
    HideDefinite,
    HideLikelyAndAbove,
}

impl SpamFilter {
    pub fn includes(self, indicator: &SpamIndicator) -> bool {
        let Some(tier) = indicator.tier() else {
            return true;
        };
        match self {
            SpamFilter::All => true,
            SpamFilter::HideDefinite => tier < SpamTier::Definite,
            SpamFilter::HideLikelyAndAbove => tier < SpamTier::Likely,
        }
    }
}

impl std::str::FromStr for SpamFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SpamFilter::All),
            "hide_definite" => Ok(SpamFilter::HideDefinite),
            "hide_likely_and_above" => Ok(SpamFilter::HideLikelyAndAbove),
            other => anyhow::bail!("Unknown spam filter: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::SpamVerificationStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum SpamVerificationStatus {
    #[db_enum(rename = "unverified")]
    Unverified,
    #[db_enum(rename = "confirmed_spam")]
    ConfirmedSpam,
    #[db_enum(rename = "confirmed_legitimate")]
    ConfirmedLegitimate,
}

/// Spam columns of a pull request
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::pull_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SpamAssessment {
    pub id: Uuid,
    pub github_id: i64,
    pub spam_score: Option<i32>,
    pub is_spam: bool,
    pub spam_verification_status: SpamVerificationStatus,
    pub spam_detected_at: Option<DateTime<Utc>>,
}

impl SpamAssessment {
    pub fn indicator(&self) -> Result<SpamIndicator, SpamError> {
        SpamIndicator::from_score(self.spam_score)
    }
}
