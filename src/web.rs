use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::actions;
use crate::auth::JwtService;
use crate::polar_config::PolarConfig;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

// App state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// `None` disables the webhook endpoint (503)
    pub polar: Option<Arc<PolarConfig>>,
    /// `None` rejects authenticated routes with a configuration error
    pub jwt: Option<Arc<JwtService>>,
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

// Middleware to capture HTTP errors to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let status = response.status();
        error!("HTTP {} error on {} {}", status.as_u16(), method, path);

        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.path", &path);
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });

        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, path),
            sentry::Level::Error,
        );
    }

    response
}

/// Build the application router with all API routes under `/data`
pub fn router(app_state: AppState) -> Router {
    let api_router = Router::new()
        // Billing
        .route("/webhooks/polar", post(actions::handle_polar_webhook))
        .route("/subscription", get(actions::get_my_subscription))
        // Spam
        .route("/pull-requests", get(actions::list_pull_request_spam))
        .route(
            "/pull-requests/{id}/spam",
            get(actions::get_pull_request_spam),
        )
        .route("/spam/classify", get(actions::classify_spam_score))
        .with_state(app_state);

    Router::new()
        .nest("/data", api_router)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(interface: String, port: u16, app_state: AppState) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    if app_state.polar.is_none() {
        info!("Polar webhooks disabled: POLAR_WEBHOOK_SECRET not configured");
    }

    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
