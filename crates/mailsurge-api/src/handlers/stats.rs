//! Aggregate statistics handler

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mailsurge_core::RegistryStats;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub stats: RegistryStats,
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        success: true,
        stats: state.registry.stats().await,
    })
}
