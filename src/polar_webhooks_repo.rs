use anyhow::Result;
use diesel::prelude::*;

use crate::polar_webhooks::{NewPolarWebhookEvent, PolarWebhookEventModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct PolarWebhookEventsRepository {
    pool: PgPool,
}

impl PolarWebhookEventsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check if a delivery has already been handled (idempotency)
    pub async fn is_processed(&self, polar_event_id: &str) -> Result<bool> {
        use crate::schema::polar_webhook_events::dsl;

        let pool = self.pool.clone();
        let polar_event_id = polar_event_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let exists: bool = diesel::select(diesel::dsl::exists(
                dsl::polar_webhook_events
                    .filter(dsl::polar_event_id.eq(&polar_event_id))
                    .filter(dsl::processed.eq(true)),
            ))
            .get_result(&mut conn)?;

            Ok::<bool, anyhow::Error>(exists)
        })
        .await??;

        Ok(result)
    }

    /// Record a delivery. Returns `None` when it was already recorded by an earlier attempt.
    pub async fn create(
        &self,
        new_event: NewPolarWebhookEvent,
    ) -> Result<Option<PolarWebhookEventModel>> {
        use crate::schema::polar_webhook_events::dsl;

        let pool = self.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let inserted: Option<PolarWebhookEventModel> =
                diesel::insert_into(dsl::polar_webhook_events)
                    .values(&new_event)
                    .on_conflict(dsl::polar_event_id)
                    .do_nothing()
                    .get_result(&mut conn)
                    .optional()?;

            Ok::<Option<PolarWebhookEventModel>, anyhow::Error>(inserted)
        })
        .await??;

        Ok(result)
    }

    pub async fn get_by_polar_event_id(
        &self,
        polar_event_id: &str,
    ) -> Result<Option<PolarWebhookEventModel>> {
        use crate::schema::polar_webhook_events::dsl;

        let pool = self.pool.clone();
        let polar_event_id = polar_event_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let event = dsl::polar_webhook_events
                .filter(dsl::polar_event_id.eq(&polar_event_id))
                .first::<PolarWebhookEventModel>(&mut conn)
                .optional()?;

            Ok::<Option<PolarWebhookEventModel>, anyhow::Error>(event)
        })
        .await??;

        Ok(result)
    }

    /// Mark a delivery as handled and clear any earlier error
    pub async fn mark_processed(&self, polar_event_id: &str) -> Result<()> {
        self.update_outcome(polar_event_id, true, None).await
    }

    /// Mark a delivery as permanently failed; redelivery will be acknowledged without retrying
    pub async fn mark_failed(&self, polar_event_id: &str, error: &str) -> Result<()> {
        self.update_outcome(polar_event_id, true, Some(error.to_string()))
            .await
    }

    /// Record a transient failure; the delivery stays unprocessed so a redelivery is retried
    pub async fn record_error(&self, polar_event_id: &str, error: &str) -> Result<()> {
        self.update_outcome(polar_event_id, false, Some(error.to_string()))
            .await
    }

    async fn update_outcome(
        &self,
        polar_event_id: &str,
        processed: bool,
        error: Option<String>,
    ) -> Result<()> {
        use crate::schema::polar_webhook_events;

        let pool = self.pool.clone();
        let polar_event_id = polar_event_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::update(polar_webhook_events::table)
                .filter(polar_webhook_events::polar_event_id.eq(&polar_event_id))
                .set((
                    polar_webhook_events::processed.eq(processed),
                    polar_webhook_events::processing_error.eq(error),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
