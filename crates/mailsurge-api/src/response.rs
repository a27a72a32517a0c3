//! Response envelopes shared by the HTTP handlers

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use mailsurge_common::config::Environment;
use mailsurge_common::Error;

/// Error body carried on every non-2xx response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Map an engine error onto a response, sanitizing 5xx detail outside of
/// development mode
pub fn error_response(err: &Error, environment: Environment) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = if status.is_server_error() && !environment.is_development() {
        tracing::error!(error = %err, "request failed");
        "Internal server error".to_string()
    } else {
        err.to_string()
    };

    let mut body = ErrorBody::new(err.code(), message);
    body.details = err.validation_details().map(|d| d.to_vec());
    if let Error::RateLimited { retry_after_secs } = err {
        body.retry_after = Some(*retry_after_secs);
    }

    (status, Json(body))
}
