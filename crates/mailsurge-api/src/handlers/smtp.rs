//! Relay verification handler

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use serde::{Deserialize, Serialize};
use tracing::info;

use mailsurge_core::rotation::{RelayDescriptor, DEFAULT_DAILY_LIMIT};
use mailsurge_core::smtp::{Mailer, SendFailure, SmtpMailer};
use mailsurge_core::validate::{self, SmtpTestFields};

use crate::response::{error_response, ApiError, ErrorBody};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpTestRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(alias = "pass")]
    pub secret: Option<String>,
    pub test_recipient: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpTestResponse {
    pub success: bool,
    pub message: String,
    pub test_sent: bool,
}

/// POST /api/smtp/test
///
/// Opens and verifies a connection to the relay; when `testRecipient` is
/// given, also pushes a short probe message through it.
pub async fn test_relay(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SmtpTestRequest>,
) -> Result<Json<SmtpTestResponse>, ApiError> {
    validate::validate_smtp_test(&SmtpTestFields {
        host: request.host.as_deref(),
        port: request.port,
        user: request.user.as_deref(),
        secret: request.secret.as_deref(),
    })
    .map_err(|e| error_response(&e, state.environment))?;

    let host = request.host.unwrap_or_default();
    let relay = RelayDescriptor {
        id: "smtp-test".to_string(),
        name: host.clone(),
        host,
        port: request.port.unwrap_or_default(),
        user: request.user.unwrap_or_default(),
        secret: request.secret.unwrap_or_default(),
        reply_to: None,
        daily_limit: DEFAULT_DAILY_LIMIT,
    };

    let mailer = SmtpMailer::open(&relay)
        .await
        .map_err(|f| failure_response(&state, f))?;
    info!(relay = %relay.name, "relay verified");

    let mut test_sent = false;
    if let Some(recipient) = request.test_recipient {
        if !validate::is_valid_email(&recipient) {
            return Err(error_response(
                &mailsurge_common::Error::Validation(vec![format!(
                    "invalid test recipient: {recipient}"
                )]),
                state.environment,
            ));
        }
        let message = probe_message(&relay, &recipient)
            .map_err(|f| failure_response(&state, f))?;
        mailer
            .send(message)
            .await
            .map_err(|f| failure_response(&state, f))?;
        test_sent = true;
    }

    Ok(Json(SmtpTestResponse {
        success: true,
        message: "SMTP connection verified".to_string(),
        test_sent,
    }))
}

fn probe_message(relay: &RelayDescriptor, recipient: &str) -> Result<Message, SendFailure> {
    use mailsurge_core::smtp::FailureKind;

    let from: Mailbox = relay.user.parse().map_err(|e| {
        SendFailure::new(FailureKind::Message, format!("invalid relay user: {e}"))
    })?;
    let to: Mailbox = recipient.parse().map_err(|e| {
        SendFailure::new(FailureKind::Message, format!("invalid recipient: {e}"))
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject("Mailsurge SMTP test")
        .header(ContentType::TEXT_PLAIN)
        .body(format!(
            "This is a test message confirming that {} accepts mail.",
            relay.host
        ))
        .map_err(|e| SendFailure::new(FailureKind::Message, e.to_string()))
}

fn failure_response(state: &AppState, failure: SendFailure) -> ApiError {
    let mut body = ErrorBody::new(failure.kind.as_str(), failure.human_message());
    if state.environment.is_development() {
        body.details = Some(vec![failure.message]);
    }
    (StatusCode::BAD_GATEWAY, Json(body))
}
