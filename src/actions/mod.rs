use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

pub mod spam;
pub mod subscriptions;
pub mod webhooks;

pub use spam::*;
pub use subscriptions::*;
pub use webhooks::*;

/// Single-object response envelope
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// JSON error body: `{"errors": "<message>"}`
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(serde_json::json!({
            "errors": message,
        })),
    )
}
