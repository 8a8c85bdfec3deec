//! Integration tests for Polar subscription webhooks.
//!
//! Requires a PostgreSQL server; see `common::TestDatabase`.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use diesel::RunQueryDsl;
use http_body_util::BodyExt;
use serial_test::serial;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use common::TestDatabase;
use contributor_info::auth::{DEFAULT_AUDIENCE, JwtService};
use contributor_info::billing_config::ProductCatalog;
use contributor_info::polar_config::PolarConfig;
use contributor_info::polar_webhooks::{
    WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER, sign,
};
use contributor_info::polar_webhooks_repo::PolarWebhookEventsRepository;
use contributor_info::subscriptions::{BillingCycle, SubscriptionStatus, SubscriptionTier};
use contributor_info::subscriptions_repo::SubscriptionsRepository;
use contributor_info::web::{AppState, PgPool, router};

const WEBHOOK_SECRET: &str = "whsec_dGVzdC13ZWJob29rLXNlY3JldA==";
const JWT_SECRET: &str = "test-jwt-secret";

fn app(pool: PgPool) -> Router {
    let catalog = ProductCatalog::new([
        ("prod_pro_monthly".to_string(), SubscriptionTier::Pro),
        ("prod_team_123".to_string(), SubscriptionTier::Team),
    ])
    .unwrap();

    router(AppState {
        pool,
        polar: Some(Arc::new(PolarConfig {
            webhook_secret: WEBHOOK_SECRET.to_string(),
            catalog,
        })),
        jwt: Some(Arc::new(JwtService::new(JWT_SECRET, DEFAULT_AUDIENCE))),
    })
}

fn subscription_event(
    event_type: &str,
    subscription_id: &str,
    product_id: &str,
    status: &str,
    user_id: Option<Uuid>,
) -> Vec<u8> {
    let metadata = match user_id {
        Some(id) => serde_json::json!({ "user_id": id.to_string() }),
        None => serde_json::json!({}),
    };
    serde_json::to_vec(&serde_json::json!({
        "type": event_type,
        "timestamp": "2025-03-01T12:00:00Z",
        "data": {
            "id": subscription_id,
            "status": status,
            "customer_id": "cus_test_1",
            "product_id": product_id,
            "recurring_interval": "year",
            "current_period_start": "2025-03-01T12:00:00Z",
            "current_period_end": "2026-03-01T12:00:00Z",
            "cancel_at_period_end": false,
            "metadata": metadata,
            "amount": 30000,
            "currency": "usd"
        }
    }))
    .unwrap()
}

async fn deliver(app: &Router, webhook_id: &str, body: Vec<u8>) -> StatusCode {
    let timestamp = Utc::now().timestamp();
    let signature = sign(WEBHOOK_SECRET, webhook_id, timestamp, &body).unwrap();

    app.clone()
        .oneshot(
            Request::post("/data/webhooks/polar")
                .header("content-type", "application/json")
                .header(WEBHOOK_ID_HEADER, webhook_id)
                .header(WEBHOOK_TIMESTAMP_HEADER, timestamp.to_string())
                .header(WEBHOOK_SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

async fn get_json(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut request = Request::get(uri);
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
#[serial]
async fn test_created_event_grants_team_tier() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());
    let user_id = Uuid::new_v4();

    let body = subscription_event(
        "subscription.created",
        "sub_team_1",
        "prod_team_123",
        "active",
        Some(user_id),
    );
    assert_eq!(deliver(&app, "msg_created_1", body).await, StatusCode::OK);

    let repo = SubscriptionsRepository::new(test_db.pool());
    let subscription = repo
        .get_by_polar_subscription_id("sub_team_1")
        .await
        .unwrap()
        .expect("subscription row was not created");

    assert_eq!(subscription.user_id, user_id);
    assert_eq!(subscription.tier, SubscriptionTier::Team);
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.billing_cycle, Some(BillingCycle::Yearly));
    assert_eq!(subscription.limits().max_workspaces, 3);
    assert_eq!(subscription.limits().max_repos_per_workspace, 3);
    assert!(!subscription.product_mismatch);

    let ledger = PolarWebhookEventsRepository::new(test_db.pool());
    let event = ledger
        .get_by_polar_event_id("msg_created_1")
        .await
        .unwrap()
        .expect("delivery was not recorded");
    assert!(event.processed);
    assert_eq!(event.event_type, "subscription.created");
    assert_eq!(event.processing_error, None);
}

#[tokio::test]
#[serial]
async fn test_replayed_delivery_is_idempotent() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());
    let user_id = Uuid::new_v4();
    let repo = SubscriptionsRepository::new(test_db.pool());

    let body = subscription_event(
        "subscription.created",
        "sub_replay",
        "prod_pro_monthly",
        "active",
        Some(user_id),
    );
    assert_eq!(
        deliver(&app, "msg_replay", body.clone()).await,
        StatusCode::OK
    );
    let first = repo
        .get_by_polar_subscription_id("sub_replay")
        .await
        .unwrap()
        .unwrap();

    // Same webhook id: acknowledged without touching the row
    assert_eq!(
        deliver(&app, "msg_replay", body.clone()).await,
        StatusCode::OK
    );
    let replayed = repo
        .get_by_polar_subscription_id("sub_replay")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replayed.updated_at, first.updated_at);

    // New webhook id, same content: applied again with an identical result
    assert_eq!(deliver(&app, "msg_replay_2", body).await, StatusCode::OK);
    let reapplied = repo
        .get_by_polar_subscription_id("sub_replay")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(repo.count_for_user(user_id).await.unwrap(), 1);
    assert_eq!(reapplied.id, first.id);
    assert_eq!(reapplied.tier, SubscriptionTier::Pro);
    assert_eq!(reapplied.limits(), first.limits());
    assert_eq!(reapplied.status, first.status);
    assert_eq!(reapplied.current_period_end, first.current_period_end);
}

fn execute_sql(pool: &PgPool, sql: &str) {
    let mut conn = pool.get().expect("Failed to get connection");
    diesel::sql_query(sql)
        .execute(&mut conn)
        .expect("Failed to execute SQL");
}

#[tokio::test]
#[serial]
async fn test_storage_failure_is_redelivered() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());
    let user_id = Uuid::new_v4();
    let ledger = PolarWebhookEventsRepository::new(test_db.pool());
    let repo = SubscriptionsRepository::new(test_db.pool());

    let body = subscription_event(
        "subscription.created",
        "sub_storage_fault",
        "prod_team_123",
        "active",
        Some(user_id),
    );

    execute_sql(
        &test_db.pool(),
        "ALTER TABLE subscriptions RENAME TO subscriptions_offline",
    );
    assert_eq!(
        deliver(&app, "msg_storage_fault", body.clone()).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    let event = ledger
        .get_by_polar_event_id("msg_storage_fault")
        .await
        .unwrap()
        .expect("ledger row was not recorded");
    assert!(!event.processed);
    assert!(event.processing_error.is_some());

    execute_sql(
        &test_db.pool(),
        "ALTER TABLE subscriptions_offline RENAME TO subscriptions",
    );

    // Provider retries with the same webhook id
    assert_eq!(
        deliver(&app, "msg_storage_fault", body).await,
        StatusCode::OK
    );

    let subscription = repo
        .get_by_polar_subscription_id("sub_storage_fault")
        .await
        .unwrap()
        .expect("subscription row was not created on redelivery");
    assert_eq!(subscription.user_id, user_id);
    assert_eq!(subscription.tier, SubscriptionTier::Team);

    let event = ledger
        .get_by_polar_event_id("msg_storage_fault")
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed);
    assert!(event.processing_error.is_none());
}

#[tokio::test]
#[serial]
async fn test_missing_user_id_is_acknowledged_without_row() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());

    let body = subscription_event(
        "subscription.created",
        "sub_orphan",
        "prod_team_123",
        "active",
        None,
    );
    assert_eq!(deliver(&app, "msg_orphan", body).await, StatusCode::OK);

    let repo = SubscriptionsRepository::new(test_db.pool());
    assert!(
        repo.get_by_polar_subscription_id("sub_orphan")
            .await
            .unwrap()
            .is_none()
    );

    let ledger = PolarWebhookEventsRepository::new(test_db.pool());
    let event = ledger
        .get_by_polar_event_id("msg_orphan")
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed);
    assert!(event.processing_error.unwrap().contains("user_id"));
}

#[tokio::test]
#[serial]
async fn test_unknown_product_falls_back_to_free_with_flag() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());

    let body = subscription_event(
        "subscription.created",
        "sub_unknown_product",
        "prod_not_configured",
        "active",
        Some(Uuid::new_v4()),
    );
    assert_eq!(deliver(&app, "msg_unknown_product", body).await, StatusCode::OK);

    let subscription = SubscriptionsRepository::new(test_db.pool())
        .get_by_polar_subscription_id("sub_unknown_product")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.tier, SubscriptionTier::Free);
    assert!(subscription.product_mismatch);
    assert_eq!(subscription.limits().max_workspaces, 0);
    assert_eq!(subscription.limits().max_repos_per_workspace, 0);
}

#[tokio::test]
#[serial]
async fn test_upgrade_and_revoke_update_row_in_place() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());
    let user_id = Uuid::new_v4();
    let repo = SubscriptionsRepository::new(test_db.pool());

    let created = subscription_event(
        "subscription.created",
        "sub_lifecycle",
        "prod_pro_monthly",
        "active",
        Some(user_id),
    );
    assert_eq!(deliver(&app, "msg_lc_1", created).await, StatusCode::OK);

    let upgraded = subscription_event(
        "subscription.updated",
        "sub_lifecycle",
        "prod_team_123",
        "active",
        Some(user_id),
    );
    assert_eq!(deliver(&app, "msg_lc_2", upgraded).await, StatusCode::OK);

    let after_upgrade = repo
        .get_by_polar_subscription_id("sub_lifecycle")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_upgrade.tier, SubscriptionTier::Team);

    let revoked = subscription_event(
        "subscription.revoked",
        "sub_lifecycle",
        "prod_team_123",
        "canceled",
        Some(user_id),
    );
    assert_eq!(deliver(&app, "msg_lc_3", revoked).await, StatusCode::OK);

    let after_revoke = repo
        .get_by_polar_subscription_id("sub_lifecycle")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_revoke.id, after_upgrade.id);
    assert_eq!(after_revoke.status, SubscriptionStatus::Revoked);
    assert_eq!(after_revoke.tier, SubscriptionTier::Free);
    assert_eq!(after_revoke.limits().max_workspaces, 0);
    assert_eq!(repo.count_for_user(user_id).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_unhandled_event_type_is_acknowledged() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());

    let body = serde_json::to_vec(&serde_json::json!({
        "type": "checkout.created",
        "data": { "id": "chk_1" }
    }))
    .unwrap();
    assert_eq!(deliver(&app, "msg_checkout", body).await, StatusCode::OK);

    let event = PolarWebhookEventsRepository::new(test_db.pool())
        .get_by_polar_event_id("msg_checkout")
        .await
        .unwrap()
        .unwrap();
    assert!(event.processed);
    assert_eq!(event.event_type, "checkout.created");
}

#[tokio::test]
#[serial]
async fn test_subscription_endpoint() {
    let test_db = TestDatabase::new()
        .await
        .expect("Failed to create test database");
    let app = app(test_db.pool());
    let jwt = JwtService::new(JWT_SECRET, DEFAULT_AUDIENCE);

    // No row yet: free plan
    let user_id = Uuid::new_v4();
    let token = jwt.generate_token(user_id, None).unwrap();
    let (status, json) = get_json(&app, "/data/subscription", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["tier"], "free");
    assert_eq!(json["data"]["status"], serde_json::Value::Null);
    assert_eq!(json["data"]["limits"]["maxWorkspaces"], 0);

    let body = subscription_event(
        "subscription.created",
        "sub_endpoint",
        "prod_team_123",
        "active",
        Some(user_id),
    );
    assert_eq!(deliver(&app, "msg_endpoint", body).await, StatusCode::OK);

    let (status, json) = get_json(&app, "/data/subscription", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["tier"], "team");
    assert_eq!(json["data"]["effectiveTier"], "team");
    assert_eq!(json["data"]["status"], "active");
    assert_eq!(json["data"]["billingCycle"], "yearly");
    assert_eq!(json["data"]["limits"]["maxWorkspaces"], 3);
    assert_eq!(json["data"]["limits"]["maxReposPerWorkspace"], 3);
    assert_eq!(json["data"]["effectiveLimits"]["maxWorkspaces"], 3);
}
