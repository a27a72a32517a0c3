//! Health and service-descriptor handlers

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::AppState;

const SERVICE_NAME: &str = "mailsurge";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Liveness response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
    pub version: &'static str,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    pub campaigns: CampaignCounts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCounts {
    pub total: usize,
    pub active: usize,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "ok".to_string(),
        version: VERSION,
        uptime_secs: state.started_at.elapsed().as_secs(),
        memory_bytes: current_memory_bytes(),
        campaigns: CampaignCounts {
            total: state.registry.total_count().await,
            active: state.registry.active_count(),
        },
    })
}

fn current_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = sysinfo::System::new();
    system.refresh_process(pid);
    system.process(pid).map(|process| process.memory())
}

/// Service descriptor
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub success: bool,
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// GET /
pub async fn descriptor() -> Json<ServiceDescriptor> {
    Json(ServiceDescriptor {
        success: true,
        name: SERVICE_NAME,
        version: VERSION,
        description: "Bulk email campaign engine",
        endpoints: vec![
            "GET /api/health",
            "POST /api/smtp/test",
            "POST /api/campaign/start",
            "GET /api/campaign/:id/status",
            "GET /api/campaign/:id/smtp-rotation",
            "POST /api/campaign/:id/stop",
            "GET /api/stats",
        ],
    })
}
