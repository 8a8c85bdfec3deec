use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use ts_rs::TS;

use crate::auth::AuthUser;
use crate::subscriptions::{
    BillingCycle, Subscription, SubscriptionStatus, SubscriptionTier, TierLimits,
};
use crate::subscriptions_repo::SubscriptionsRepository;
use crate::web::AppState;

use super::{DataResponse, json_error};

/// View model for the caller's plan (API response)
#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub tier: SubscriptionTier,
    /// Tier in force right now; differs from `tier` once a canceled period has ended
    pub effective_tier: SubscriptionTier,
    /// `None` when the user has never subscribed
    pub status: Option<SubscriptionStatus>,
    /// Limits of the stored `tier`
    pub limits: TierLimits,
    /// Limits to enforce now, always those of `effective_tier`
    pub effective_limits: TierLimits,
    pub billing_cycle: Option<BillingCycle>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub polar_subscription_id: Option<String>,
}

impl SubscriptionView {
    /// Plan of a user with no subscription row
    pub fn free() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            effective_tier: SubscriptionTier::Free,
            status: None,
            limits: SubscriptionTier::Free.limits(),
            effective_limits: SubscriptionTier::Free.limits(),
            billing_cycle: None,
            current_period_end: None,
            cancel_at_period_end: false,
            polar_subscription_id: None,
        }
    }

    pub fn from_subscription(subscription: Subscription, now: DateTime<Utc>) -> Self {
        let effective_tier = subscription.effective_tier(now);
        Self {
            tier: subscription.tier,
            effective_tier,
            status: Some(subscription.status),
            limits: subscription.limits(),
            effective_limits: effective_tier.limits(),
            billing_cycle: subscription.billing_cycle,
            current_period_end: subscription.current_period_end.map(|t| t.to_rfc3339()),
            cancel_at_period_end: subscription.cancel_at_period_end,
            polar_subscription_id: Some(subscription.polar_subscription_id),
        }
    }
}

/// GET /subscription
/// Current user's plan and limits
pub async fn get_my_subscription(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let repo = SubscriptionsRepository::new(state.pool.clone());

    match repo.get_current_for_user(auth_user.0.id).await {
        Ok(Some(subscription)) => Json(DataResponse {
            data: SubscriptionView::from_subscription(subscription, Utc::now()),
        })
        .into_response(),
        Ok(None) => Json(DataResponse {
            data: SubscriptionView::free(),
        })
        .into_response(),
        Err(e) => {
            error!(user_id = %auth_user.0.id, error = %e, "Failed to load subscription");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load subscription",
            )
            .into_response()
        }
    }
}
