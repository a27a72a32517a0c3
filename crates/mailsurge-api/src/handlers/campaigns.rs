//! Campaign control handlers

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use mailsurge_common::Error;
use mailsurge_core::campaign::{CampaignSnapshot, CampaignStatus, CampaignSubmission};
use mailsurge_core::rotation::RelaySnapshot;

use crate::response::{error_response, ApiError};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub campaign_id: String,
    pub message: String,
}

/// POST /api/campaign/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<CampaignSubmission>,
) -> Result<Json<StartResponse>, ApiError> {
    let campaign_id = state
        .registry
        .submit(submission)
        .await
        .map_err(|e| error_response(&e, state.environment))?;

    info!(campaign = %campaign_id, "campaign submitted");
    Ok(Json(StartResponse {
        success: true,
        campaign_id,
        message: "Campaign started".to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub campaign: CampaignSnapshot,
}

/// GET /api/campaign/:id/status
pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let campaign = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| not_found(&state, &id))?;

    Ok(Json(StatusResponse {
        success: true,
        campaign: campaign.snapshot(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationResponse {
    pub success: bool,
    pub campaign_id: String,
    pub relays: Vec<RelaySnapshot>,
}

/// GET /api/campaign/:id/smtp-rotation
pub async fn campaign_rotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RotationResponse>, ApiError> {
    let campaign = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| not_found(&state, &id))?;

    // empty until the executor has built its tracker
    let relays = campaign
        .rotation()
        .map(|tracker| tracker.snapshot())
        .unwrap_or_default();

    Ok(Json(RotationResponse {
        success: true,
        campaign_id: id,
        relays,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
    pub stopped: bool,
    pub status: CampaignStatus,
}

/// POST /api/campaign/:id/stop
pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let stopped = state
        .registry
        .stop(&id)
        .await
        .ok_or_else(|| not_found(&state, &id))?;

    let status = match state.registry.get(&id).await {
        Some(campaign) => campaign.status(),
        None => CampaignStatus::Stopped,
    };

    Ok(Json(StopResponse {
        success: true,
        stopped,
        status,
    }))
}

fn not_found(state: &AppState, id: &str) -> ApiError {
    error_response(
        &Error::NotFound(format!("campaign {id}")),
        state.environment,
    )
}
