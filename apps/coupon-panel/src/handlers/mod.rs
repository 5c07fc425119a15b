pub mod assets;
pub mod generate;
pub mod history;
pub mod index;
pub mod validate;


use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Logs the failure and answers with a plain-text 500.
pub(crate) fn internal_error(action: &str, e: impl std::fmt::Display) -> Response {
    error!("{} failed: {:#}", action, e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{} failed", action)).into_response()
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

pub async fn health() -> &'static str {
    "ok"
}
