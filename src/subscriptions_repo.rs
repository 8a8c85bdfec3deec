use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::subscriptions::{NewSubscription, Subscription, SubscriptionModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct SubscriptionsRepository {
    pool: PgPool,
}

impl SubscriptionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite the row for this Polar subscription.
    ///
    /// Every mapped column is replaced, so applying the same record twice leaves one identical row.
    pub async fn upsert(&self, record: NewSubscription) -> Result<Subscription> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let saved: SubscriptionModel = diesel::insert_into(dsl::subscriptions)
                .values(&record)
                .on_conflict(dsl::polar_subscription_id)
                .do_update()
                .set((&record, dsl::updated_at.eq(diesel::dsl::now)))
                .get_result(&mut conn)?;

            Ok::<SubscriptionModel, anyhow::Error>(saved)
        })
        .await??;

        Ok(result.into())
    }

    pub async fn get_by_polar_subscription_id(
        &self,
        polar_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let polar_subscription_id = polar_subscription_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let subscription: Option<SubscriptionModel> = dsl::subscriptions
                .filter(dsl::polar_subscription_id.eq(&polar_subscription_id))
                .first::<SubscriptionModel>(&mut conn)
                .optional()?;

            Ok::<Option<SubscriptionModel>, anyhow::Error>(subscription)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    /// Most recently updated subscription for a user
    pub async fn get_current_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let subscription: Option<SubscriptionModel> = dsl::subscriptions
                .filter(dsl::user_id.eq(user_id))
                .order_by(dsl::updated_at.desc())
                .first::<SubscriptionModel>(&mut conn)
                .optional()?;

            Ok::<Option<SubscriptionModel>, anyhow::Error>(subscription)
        })
        .await??;

        Ok(result.map(|model| model.into()))
    }

    pub async fn count_for_user(&self, user_id: Uuid) -> Result<i64> {
        use crate::schema::subscriptions::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i64 = dsl::subscriptions
                .filter(dsl::user_id.eq(user_id))
                .count()
                .get_result(&mut conn)?;

            Ok::<i64, anyhow::Error>(count)
        })
        .await??;

        Ok(result)
    }
}
