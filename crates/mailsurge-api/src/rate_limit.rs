//! Per-IP sliding-window rate limiting for the HTTP boundary
//!
//! Three independent windows: SMTP tests, campaign starts, and everything
//! else under `/api`. Violations return 429 with a retry hint.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tracing::warn;

use mailsurge_common::Error;

use crate::response::error_response;
use crate::AppState;

/// A request category with its own window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    SmtpTest,
    CampaignStart,
    General,
}

impl Category {
    fn window(self) -> (usize, Duration) {
        match self {
            Category::SmtpTest => (10, Duration::from_secs(15 * 60)),
            Category::CampaignStart => (5, Duration::from_secs(60 * 60)),
            Category::General => (100, Duration::from_secs(15 * 60)),
        }
    }

    fn for_path(path: &str) -> Option<Self> {
        if path == "/api/smtp/test" {
            Some(Category::SmtpTest)
        } else if path == "/api/campaign/start" {
            Some(Category::CampaignStart)
        } else if path.starts_with("/api/") {
            Some(Category::General)
        } else {
            None
        }
    }
}

/// Sliding-window hit counters keyed by client IP and category
pub struct RateLimiter {
    hits: Mutex<HashMap<(IpAddr, Category), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit; `Err` carries the seconds until the window frees up
    pub fn check(&self, ip: IpAddr, category: Category) -> Result<(), u64> {
        let (limit, period) = category.window();
        let now = Instant::now();

        let mut hits = self.hits.lock();
        let window = hits.entry((ip, category)).or_default();
        while window
            .front()
            .is_some_and(|at| now.duration_since(*at) >= period)
        {
            window.pop_front();
        }

        if window.len() >= limit {
            let retry_after = window
                .front()
                .map(|oldest| period.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(period);
            return Err(retry_after.as_secs().max(1));
        }

        window.push_back(now);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Axum middleware enforcing the per-IP windows
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(category) = Category::for_path(request.uri().path()) else {
        return next.run(request).await;
    };

    let ip = client_ip(&request);
    match state.rate_limiter.check(ip, category) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            warn!(%ip, path = %request.uri().path(), "rate limit exceeded");
            error_response(
                &Error::RateLimited { retry_after_secs },
                state.environment,
            )
            .into_response()
        }
    }
}
