use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::spam::{
    BadgeColor, SpamAssessment, SpamBadge, SpamFilter, SpamIndicator, SpamScore, SpamTier,
    SpamVerificationStatus,
};
use crate::spam_repo::SpamAssessmentsRepository;
use crate::web::AppState;

use super::{DataResponse, json_error};

/// Badge as rendered by the UI
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SpamBadgeView {
    pub label: String,
    pub icon: String,
    pub color: BadgeColor,
    /// Icon and label joined, e.g. "🚫 Spam"
    pub text: String,
}

impl From<SpamBadge> for SpamBadgeView {
    fn from(badge: SpamBadge) -> Self {
        Self {
            label: badge.label.to_string(),
            icon: badge.icon.to_string(),
            color: badge.color,
            text: badge.to_string(),
        }
    }
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SpamClassificationView {
    pub score: Option<i32>,
    pub tier: Option<SpamTier>,
    pub is_spam: bool,
    pub badge: Option<SpamBadgeView>,
}

impl From<SpamIndicator> for SpamClassificationView {
    fn from(indicator: SpamIndicator) -> Self {
        let score = match indicator {
            SpamIndicator::NotAssessed => None,
            SpamIndicator::Assessed { score, .. } => Some(score.value()),
        };
        Self {
            score,
            tier: indicator.tier(),
            is_spam: indicator.is_spam(),
            badge: indicator.badge().map(SpamBadgeView::from),
        }
    }
}

/// View model for a pull request's spam assessment (API response)
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SpamAssessmentView {
    pub pull_request_id: String,
    pub github_id: i64,
    #[serde(flatten)]
    pub classification: SpamClassificationView,
    pub verification_status: SpamVerificationStatus,
    pub detected_at: Option<String>,
}

impl SpamAssessmentView {
    pub fn from_assessment(assessment: SpamAssessment, indicator: SpamIndicator) -> Self {
        Self {
            pull_request_id: assessment.id.to_string(),
            github_id: assessment.github_id,
            classification: indicator.into(),
            verification_status: assessment.spam_verification_status,
            detected_at: assessment.spam_detected_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// GET /pull-requests/{id}/spam
/// `id` is either the internal UUID or the GitHub id
pub async fn get_pull_request_spam(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let repo = SpamAssessmentsRepository::new(state.pool.clone());

    let lookup = if let Ok(uuid) = id.parse::<Uuid>() {
        repo.get_by_id(uuid).await
    } else if let Ok(github_id) = id.parse::<i64>() {
        repo.get_by_github_id(github_id).await
    } else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid pull request id").into_response();
    };

    let assessment = match lookup {
        Ok(Some(assessment)) => assessment,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "Pull request not found").into_response();
        }
        Err(e) => {
            error!(pull_request = %id, error = %e, "Failed to load spam assessment");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load spam assessment",
            )
            .into_response();
        }
    };

    match assessment.indicator() {
        Ok(indicator) => Json(DataResponse {
            data: SpamAssessmentView::from_assessment(assessment, indicator),
        })
        .into_response(),
        Err(e) => {
            error!(pull_request = %id, error = %e, "Stored spam score is invalid");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid stored spam score")
                .into_response()
        }
    }
}

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct PullRequestListParams {
    /// `all`, `hide_definite` or `hide_likely_and_above`
    pub spam_filter: Option<String>,
    pub limit: Option<i64>,
}

/// GET /pull-requests?spam_filter=...&limit=N
/// Recent pull requests with their spam assessment, filtered by tier
pub async fn list_pull_request_spam(
    State(state): State<AppState>,
    Query(params): Query<PullRequestListParams>,
) -> impl IntoResponse {
    let filter = match params.spam_filter.as_deref().map(str::parse::<SpamFilter>) {
        None => SpamFilter::default(),
        Some(Ok(filter)) => filter,
        Some(Err(e)) => {
            return json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response();
        }
    };
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let repo = SpamAssessmentsRepository::new(state.pool.clone());
    let assessments = match repo.list_recent(limit).await {
        Ok(assessments) => assessments,
        Err(e) => {
            error!(error = %e, "Failed to list spam assessments");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list spam assessments",
            )
            .into_response();
        }
    };

    let views: Vec<SpamAssessmentView> = assessments
        .into_iter()
        .filter_map(|assessment| match assessment.indicator() {
            Ok(indicator) => filter
                .includes(&indicator)
                .then(|| SpamAssessmentView::from_assessment(assessment, indicator)),
            Err(e) => {
                warn!(pull_request_id = %assessment.id, error = %e, "Skipping invalid stored spam score");
                None
            }
        })
        .collect();

    Json(DataResponse { data: views }).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ClassifyQuery {
    pub score: i32,
}

/// GET /spam/classify?score=N
/// Preview the tier and badge for a score
pub async fn classify_spam_score(Query(query): Query<ClassifyQuery>) -> impl IntoResponse {
    match SpamScore::new(query.score) {
        Ok(score) => Json(DataResponse {
            data: SpamClassificationView::from(SpamIndicator::Assessed {
                score,
                tier: score.tier(),
            }),
        })
        .into_response(),
        Err(e) => json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response(),
    }
}
