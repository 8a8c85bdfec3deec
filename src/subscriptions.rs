use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::SubscriptionTier")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    #[db_enum(rename = "free")]
    Free,
    #[db_enum(rename = "pro")]
    Pro,
    #[db_enum(rename = "team")]
    Team,
}

impl SubscriptionTier {
    pub fn limits(self) -> TierLimits {
        TierLimits::for_tier(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Team => "team",
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "pro" => Ok(SubscriptionTier::Pro),
            "team" => Ok(SubscriptionTier::Team),
            other => anyhow::bail!("Unknown subscription tier: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::SubscriptionStatus")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[db_enum(rename = "trialing")]
    Trialing,
    #[db_enum(rename = "active")]
    Active,
    #[db_enum(rename = "canceled")]
    Canceled,
    #[db_enum(rename = "revoked")]
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum, TS)]
#[db_enum(existing_type_path = "crate::schema::sql_types::BillingCycle")]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[db_enum(rename = "monthly")]
    Monthly,
    #[db_enum(rename = "yearly")]
    Yearly,
}

impl BillingCycle {
    /// Map a provider recurring interval onto a billing cycle.
    /// Anything other than "month" or "year" has no cycle.
    pub fn from_interval(interval: &str) -> Option<Self> {
        match interval {
            "month" => Some(BillingCycle::Monthly),
            "year" => Some(BillingCycle::Yearly),
            _ => None,
        }
    }
}

/// Feature limits granted by a tier. Only ever obtained from [`TierLimits::for_tier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct TierLimits {
    pub max_workspaces: i32,
    pub max_repos_per_workspace: i32,
}

impl TierLimits {
    pub const fn for_tier(tier: SubscriptionTier) -> Self {
        match tier {
            SubscriptionTier::Free => Self {
                max_workspaces: 0,
                max_repos_per_workspace: 0,
            },
            SubscriptionTier::Pro => Self {
                max_workspaces: 1,
                max_repos_per_workspace: 3,
            },
            SubscriptionTier::Team => Self {
                max_workspaces: 3,
                max_repos_per_workspace: 3,
            },
        }
    }
}

/// API model for subscriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub polar_customer_id: String,
    pub polar_subscription_id: String,
    pub status: SubscriptionStatus,
    pub tier: SubscriptionTier,
    pub billing_cycle: Option<BillingCycle>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub product_mismatch: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Tier the user is entitled to right now.
    ///
    /// A canceled subscription keeps its tier until the paid period ends.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        match self.status {
            SubscriptionStatus::Trialing | SubscriptionStatus::Active => self.tier,
            SubscriptionStatus::Canceled => match self.current_period_end {
                Some(end) if end > now => self.tier,
                _ => SubscriptionTier::Free,
            },
            SubscriptionStatus::Revoked => SubscriptionTier::Free,
        }
    }

    pub fn limits(&self) -> TierLimits {
        self.tier.limits()
    }
}

/// Diesel model for the subscriptions table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionModel {
    pub id: Uuid,
    pub user_id: Uuid,
    pub polar_customer_id: String,
    pub polar_subscription_id: String,
    pub status: SubscriptionStatus,
    pub tier: SubscriptionTier,
    pub max_workspaces: i32,
    pub max_repos_per_workspace: i32,
    pub billing_cycle: Option<BillingCycle>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub product_mismatch: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert/upsert model for subscriptions.
///
/// The tier and its limits are private and only change together through
/// [`NewSubscription::new`] and [`NewSubscription::set_tier`].
#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize)]
#[diesel(table_name = crate::schema::subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub polar_customer_id: String,
    pub polar_subscription_id: String,
    pub status: SubscriptionStatus,
    tier: SubscriptionTier,
    max_workspaces: i32,
    max_repos_per_workspace: i32,
    pub billing_cycle: Option<BillingCycle>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub product_mismatch: bool,
}

impl NewSubscription {
    pub fn new(
        user_id: Uuid,
        polar_customer_id: String,
        polar_subscription_id: String,
        status: SubscriptionStatus,
        tier: SubscriptionTier,
        current_period_start: DateTime<Utc>,
    ) -> Self {
        let limits = tier.limits();
        Self {
            user_id,
            polar_customer_id,
            polar_subscription_id,
            status,
            tier,
            max_workspaces: limits.max_workspaces,
            max_repos_per_workspace: limits.max_repos_per_workspace,
            billing_cycle: None,
            current_period_start,
            current_period_end: None,
            cancel_at_period_end: false,
            product_mismatch: false,
        }
    }

    pub fn set_tier(&mut self, tier: SubscriptionTier) {
        let limits = tier.limits();
        self.tier = tier;
        self.max_workspaces = limits.max_workspaces;
        self.max_repos_per_workspace = limits.max_repos_per_workspace;
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.tier
    }

    pub fn limits(&self) -> TierLimits {
        TierLimits {
            max_workspaces: self.max_workspaces,
            max_repos_per_workspace: self.max_repos_per_workspace,
        }
    }
}

impl From<SubscriptionModel> for Subscription {
    fn from(model: SubscriptionModel) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            polar_customer_id: model.polar_customer_id,
            polar_subscription_id: model.polar_subscription_id,
            status: model.status,
            tier: model.tier,
            billing_cycle: model.billing_cycle,
            current_period_start: model.current_period_start,
            current_period_end: model.current_period_end,
            cancel_at_period_end: model.cancel_at_period_end,
            product_mismatch: model.product_mismatch,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
