//! Mailsurge API - HTTP control plane
//!
//! This crate provides the REST surface for the campaign engine: campaign
//! submission and control, relay testing, and health/statistics endpoints,
//! with per-IP rate limiting at the boundary.

pub mod handlers;
pub mod rate_limit;
pub mod response;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use mailsurge_common::config::Environment;
use mailsurge_core::Registry;

use rate_limit::RateLimiter;

pub use routes::create_router;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<Registry>,
    pub environment: Environment,
    pub started_at: Instant,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, environment: Environment) -> Arc<Self> {
        Arc::new(Self {
            registry,
            environment,
            started_at: Instant::now(),
            rate_limiter: RateLimiter::new(),
        })
    }
}
