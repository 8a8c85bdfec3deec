use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::polar_config::PolarConfig;
use crate::polar_webhooks::{
    NewPolarWebhookEvent, PolarEvent, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER,
    WEBHOOK_TIMESTAMP_HEADER, WebhookError, WebhookHeaders, verify_signature,
};
use crate::polar_webhooks_repo::PolarWebhookEventsRepository;
use crate::subscriptions_repo::SubscriptionsRepository;
use crate::tier_mapper::{MappingError, TierMapper};
use crate::web::AppState;

/// Why a verified delivery could not be applied
#[derive(Debug, Error)]
enum ProcessError {
    /// The payload can never be applied; redelivery would fail the same way
    #[error(transparent)]
    Invalid(#[from] MappingError),
    #[error(transparent)]
    Malformed(WebhookError),
    /// Storage failed; the provider should redeliver
    #[error("Failed to persist subscription: {0}")]
    Persistence(anyhow::Error),
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(WebhookError::MissingHeader(name))
}

fn webhook_headers(headers: &HeaderMap) -> Result<WebhookHeaders<'_>, WebhookError> {
    Ok(WebhookHeaders {
        id: header_str(headers, WEBHOOK_ID_HEADER)?,
        timestamp: header_str(headers, WEBHOOK_TIMESTAMP_HEADER)?,
        signature: header_str(headers, WEBHOOK_SIGNATURE_HEADER)?,
    })
}

/// POST /webhooks/polar
/// Apply a Polar subscription lifecycle delivery
pub async fn handle_polar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let polar_config = match &state.polar {
        Some(config) => config.clone(),
        None => {
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    metrics::counter!("polar.webhook.received").increment(1);
    let start = std::time::Instant::now();

    let signing_headers = match webhook_headers(&headers) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "Rejected Polar webhook");
            metrics::counter!("polar.webhook.signature_invalid").increment(1);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Err(e) = verify_signature(
        &polar_config.webhook_secret,
        &signing_headers,
        &body,
        Utc::now(),
    ) {
        warn!(error = %e, webhook_id = %signing_headers.id, "Invalid webhook signature");
        metrics::counter!("polar.webhook.signature_invalid").increment(1);
        return StatusCode::BAD_REQUEST.into_response();
    }

    let webhook_repo = PolarWebhookEventsRepository::new(state.pool.clone());

    // Check idempotency
    let event_id = signing_headers.id.to_string();
    match webhook_repo.is_processed(&event_id).await {
        Ok(true) => {
            debug!(event_id = %event_id, "Webhook already processed");
            return StatusCode::OK.into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to check webhook idempotency");
        }
        _ => {}
    }

    let parsed = PolarEvent::parse(&body);
    let event_type = match &parsed {
        Ok(event) => event.event_type().to_string(),
        Err(_) => "unparseable".to_string(),
    };

    let payload = serde_json::from_slice::<serde_json::Value>(&body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&body).into()));
    let new_event = NewPolarWebhookEvent {
        polar_event_id: event_id.clone(),
        event_type: event_type.clone(),
        payload,
    };

    if let Err(e) = webhook_repo.create(new_event).await {
        // A failed earlier attempt leaves the row in place, that's OK
        warn!(error = %e, event_id = %event_id, "Failed to record webhook event");
    }

    let process_result = match parsed {
        Ok(event) => process_webhook_event(&state, &polar_config, &event).await,
        Err(e) => Err(ProcessError::Malformed(e)),
    };

    let status = match process_result {
        Ok(()) => {
            if let Err(e) = webhook_repo.mark_processed(&event_id).await {
                error!(error = %e, "Failed to mark webhook as processed");
            }
            StatusCode::OK
        }
        Err(e @ (ProcessError::Invalid(_) | ProcessError::Malformed(_))) => {
            warn!(event_type = %event_type, event_id = %event_id, error = %e, "Rejected webhook payload");
            sentry::capture_message(
                &format!("Polar webhook {} ({}) rejected: {}", event_id, event_type, e),
                sentry::Level::Warning,
            );
            if let Err(e2) = webhook_repo.mark_failed(&event_id, &e.to_string()).await {
                error!(error = %e2, "Failed to mark webhook as failed");
            }
            StatusCode::OK
        }
        Err(e @ ProcessError::Persistence(_)) => {
            error!(event_type = %event_type, event_id = %event_id, error = %e, "Failed to process webhook event");
            if let Err(e2) = webhook_repo.record_error(&event_id, &e.to_string()).await {
                error!(error = %e2, "Failed to record webhook error");
            }
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let duration_ms = start.elapsed().as_millis() as f64;
    metrics::histogram!("polar.webhook.processing_ms").record(duration_ms);

    status.into_response()
}

async fn process_webhook_event(
    state: &AppState,
    polar_config: &PolarConfig,
    event: &PolarEvent,
) -> Result<(), ProcessError> {
    match event {
        PolarEvent::Subscription { kind, subscription } => {
            let mapped = TierMapper::new(&polar_config.catalog).map(*kind, subscription)?;

            if let Some(mismatch) = &mapped.mismatch {
                warn!(
                    product_id = %mismatch.product_id,
                    subscription_id = %subscription.id,
                    "Unknown Polar product, falling back to free tier"
                );
                metrics::counter!("polar.webhook.product_mismatch").increment(1);
            }

            let tier = mapped.record.tier();
            let repo = SubscriptionsRepository::new(state.pool.clone());
            let saved = repo
                .upsert(mapped.record)
                .await
                .map_err(ProcessError::Persistence)?;

            metrics::counter!("polar.subscriptions.upserted", "tier" => tier.as_str())
                .increment(1);
            info!(
                event_type = kind.as_str(),
                subscription_id = %saved.polar_subscription_id,
                user_id = %saved.user_id,
                tier = %saved.tier,
                "Applied Polar subscription event"
            );
        }
        PolarEvent::Ignored { event_type } => {
            debug!(event_type = %event_type, "Unhandled Polar webhook event type");
        }
    }

    Ok(())
}
