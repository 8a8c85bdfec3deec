//! Maps Polar subscription payloads onto `subscriptions` rows.
//!
//! The mapper is a pure function of its input and the product catalog: it
//! never reads the clock or the database, so a redelivered event maps to the
//! exact same record.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::billing_config::ProductCatalog;
use crate::polar_webhooks::{
    MetadataValue, PolarSubscription, PolarSubscriptionStatus, SubscriptionEventKind,
};
use crate::subscriptions::{BillingCycle, NewSubscription, SubscriptionStatus, SubscriptionTier};

/// Metadata key carrying the contributor.info user id
pub const USER_ID_METADATA_KEY: &str = "user_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: &'static str },
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Set when the product id isn't in the catalog and the record fell back to the free tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductMismatch {
    pub product_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedSubscription {
    pub record: NewSubscription,
    pub mismatch: Option<ProductMismatch>,
}

pub struct TierMapper<'a> {
    catalog: &'a ProductCatalog,
}

impl<'a> TierMapper<'a> {
    pub fn new(catalog: &'a ProductCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve a product id to its tier. Unknown products fall back to free with a mismatch.
    pub fn resolve_tier(&self, product_id: &str) -> (SubscriptionTier, Option<ProductMismatch>) {
        match self.catalog.resolve(product_id) {
            Some(tier) => (tier, None),
            None => (
                SubscriptionTier::Free,
                Some(ProductMismatch {
                    product_id: product_id.to_string(),
                }),
            ),
        }
    }

    pub fn map(
        &self,
        kind: SubscriptionEventKind,
        subscription: &PolarSubscription,
    ) -> Result<MappedSubscription, MappingError> {
        let user_id = required_user_id(subscription)?;
        let polar_customer_id = required_text("customer_id", &subscription.customer_id)?;
        let polar_subscription_id = required_text("id", &subscription.id)?;

        let (tier, mismatch) = self.resolve_tier(&subscription.product_id);
        let status = map_status(kind, subscription.status);

        let mut record = NewSubscription::new(
            user_id,
            polar_customer_id,
            polar_subscription_id,
            status,
            tier,
            subscription.current_period_start,
        );
        record.billing_cycle = subscription
            .recurring_interval
            .as_deref()
            .and_then(BillingCycle::from_interval);
        record.current_period_end = subscription.current_period_end;
        record.cancel_at_period_end = subscription.cancel_at_period_end;
        record.product_mismatch = mismatch.is_some();

        // Revocation ends access immediately
        if status == SubscriptionStatus::Revoked {
            record.set_tier(SubscriptionTier::Free);
        }

        Ok(MappedSubscription { record, mismatch })
    }
}

fn map_status(kind: SubscriptionEventKind, status: PolarSubscriptionStatus) -> SubscriptionStatus {
    if kind == SubscriptionEventKind::Revoked {
        return SubscriptionStatus::Revoked;
    }

    match status {
        PolarSubscriptionStatus::Trialing | PolarSubscriptionStatus::Incomplete => {
            SubscriptionStatus::Trialing
        }
        PolarSubscriptionStatus::Active | PolarSubscriptionStatus::PastDue => {
            SubscriptionStatus::Active
        }
        PolarSubscriptionStatus::Canceled
        | PolarSubscriptionStatus::Unpaid
        | PolarSubscriptionStatus::IncompleteExpired => SubscriptionStatus::Canceled,
    }
}

fn required_text(field: &'static str, value: &str) -> Result<String, MappingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(MappingError::MissingRequiredField { field });
    }
    Ok(value.to_string())
}

fn required_user_id(subscription: &PolarSubscription) -> Result<Uuid, MappingError> {
    match subscription.metadata.get(USER_ID_METADATA_KEY) {
        None => Err(MappingError::MissingRequiredField {
            field: USER_ID_METADATA_KEY,
        }),
        Some(MetadataValue::String(raw)) if raw.trim().is_empty() => {
            Err(MappingError::MissingRequiredField {
                field: USER_ID_METADATA_KEY,
            })
        }
        Some(MetadataValue::String(raw)) => {
            raw.trim()
                .parse::<Uuid>()
                .map_err(|_| MappingError::InvalidField {
                    field: USER_ID_METADATA_KEY,
                    value: raw.clone(),
                })
        }
        Some(other) => Err(MappingError::InvalidField {
            field: USER_ID_METADATA_KEY,
            value: format!("{:?}", other),
        }),
    }
}
