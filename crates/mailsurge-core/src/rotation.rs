//! Relay rotation with per-relay health tracking
//!
//! Each campaign owns one [`RotationTracker`] built from its relay list. The
//! tracker deactivates relays that keep failing, brings them back after a
//! cooldown, enforces daily send caps, and picks the healthiest relay for
//! every send.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default per-relay daily send cap
pub const DEFAULT_DAILY_LIMIT: u32 = 500;

/// How long a deactivated relay stays out of rotation
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// A configured outbound SMTP relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub secret: String,
    pub reply_to: Option<String>,
    pub daily_limit: u32,
}

impl RelayDescriptor {
    /// Key under which a verified transport for this relay is cached
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.user)
    }
}

/// Health bookkeeping for one relay
#[derive(Debug)]
struct RelayState {
    descriptor: RelayDescriptor,
    active: bool,
    failure_count: u32,
    sent_count: u32,
    last_used: Option<Instant>,
    last_failure: Option<Instant>,
    response_time: Option<Duration>,
}

impl RelayState {
    fn new(descriptor: RelayDescriptor) -> Self {
        Self {
            descriptor,
            active: true,
            failure_count: 0,
            sent_count: 0,
            last_used: None,
            last_failure: None,
            response_time: None,
        }
    }

    fn selectable(&self) -> bool {
        self.active && self.sent_count < self.descriptor.daily_limit
    }
}

/// Point-in-time view of one relay, for status reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySnapshot {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub active: bool,
    pub failure_count: u32,
    pub sent_count: u32,
    pub daily_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_last_use: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_last_failure: Option<u64>,
}

/// Per-campaign relay fleet state
pub struct RotationTracker {
    relays: Mutex<Vec<RelayState>>,
    cooldown: Duration,
    current_index: AtomicUsize,
}

impl RotationTracker {
    pub fn new(descriptors: Vec<RelayDescriptor>) -> Self {
        Self {
            relays: Mutex::new(descriptors.into_iter().map(RelayState::new).collect()),
            cooldown: DEFAULT_COOLDOWN,
            current_index: AtomicUsize::new(0),
        }
    }

    /// Override the reactivation cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn len(&self) -> usize {
        self.relays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.lock().is_empty()
    }

    /// Pick the next relay to send through.
    ///
    /// Expired cooldowns are processed first, then the healthiest selectable
    /// relay wins: fewest failures, then fewest sends, then fastest observed
    /// response, then original list order. Relays without a measured response
    /// time sort ahead of measured ones so cold relays get warmed.
    pub fn select(&self) -> Option<RelayDescriptor> {
        let mut relays = self.relays.lock();
        let now = Instant::now();

        for state in relays.iter_mut() {
            if !state.active {
                let expired = state
                    .last_failure
                    .is_some_and(|at| now.duration_since(at) >= self.cooldown);
                if expired {
                    state.active = true;
                    state.failure_count = 0;
                    info!(relay = %state.descriptor.name, "relay cooldown expired, back in rotation");
                }
            }
        }

        let picked = relays
            .iter()
            .enumerate()
            .filter(|(_, state)| state.selectable())
            .min_by_key(|(index, state)| {
                (
                    state.failure_count,
                    state.sent_count,
                    state.response_time,
                    *index,
                )
            })
            .map(|(index, state)| (index, state.descriptor.clone()));

        match picked {
            Some((index, descriptor)) => {
                self.current_index.store(index, Ordering::Relaxed);
                debug!(relay = %descriptor.name, "relay selected");
                Some(descriptor)
            }
            None => None,
        }
    }

    /// Record a delivered message through `relay_id`
    pub fn mark_success(&self, relay_id: &str, elapsed: Duration) {
        let mut relays = self.relays.lock();
        if let Some(state) = relays
            .iter_mut()
            .find(|state| state.descriptor.id == relay_id)
        {
            state.sent_count += 1;
            state.last_used = Some(Instant::now());
            state.response_time = Some(elapsed);
            if state.failure_count > 0 {
                state.failure_count -= 1;
            }
        }
    }

    /// Record a failed send through `relay_id`; deactivates the relay once
    /// `max_failures` is reached
    pub fn mark_failure(&self, relay_id: &str, max_failures: u32) {
        let mut relays = self.relays.lock();
        if let Some(state) = relays
            .iter_mut()
            .find(|state| state.descriptor.id == relay_id)
        {
            state.failure_count += 1;
            state.last_failure = Some(Instant::now());
            if state.failure_count >= max_failures && state.active {
                state.active = false;
                warn!(
                    relay = %state.descriptor.name,
                    failures = state.failure_count,
                    "relay deactivated until cooldown expires"
                );
            }
        }
    }

    /// Point-in-time view of the fleet for status reporting
    pub fn snapshot(&self) -> Vec<RelaySnapshot> {
        let relays = self.relays.lock();
        let now = Instant::now();
        relays
            .iter()
            .map(|state| RelaySnapshot {
                id: state.descriptor.id.clone(),
                name: state.descriptor.name.clone(),
                host: state.descriptor.host.clone(),
                port: state.descriptor.port,
                active: state.active,
                failure_count: state.failure_count,
                sent_count: state.sent_count,
                daily_limit: state.descriptor.daily_limit,
                response_time_ms: state.response_time.map(|d| d.as_millis() as u64),
                seconds_since_last_use: state
                    .last_used
                    .map(|at| now.duration_since(at).as_secs()),
                seconds_since_last_failure: state
                    .last_failure
                    .map(|at| now.duration_since(at).as_secs()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(id: &str) -> RelayDescriptor {
        RelayDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            host: format!("{id}.example.com"),
            port: 587,
            user: format!("sender@{id}.example.com"),
            secret: "hunter2".to_string(),
            reply_to: None,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }

    #[test]
    fn test_select_prefers_list_order_when_equal() {
        let tracker = RotationTracker::new(vec![relay("a"), relay("b")]);
        assert_eq!(tracker.select().unwrap().id, "a");
    }

    #[test]
    fn test_select_is_idempotent_without_state_change() {
        let tracker = RotationTracker::new(vec![relay("a"), relay("b")]);
        let first = tracker.select().unwrap();
        let second = tracker.select().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_select_prefers_fewest_failures_then_fewest_sends() {
        let tracker = RotationTracker::new(vec![relay("a"), relay("b"), relay("c")]);
        tracker.mark_failure("a", 3);
        tracker.mark_success("b", Duration::from_millis(120));
        // a has one failure, b has one send; c is untouched and wins
        assert_eq!(tracker.select().unwrap().id, "c");
        tracker.mark_success("c", Duration::from_millis(80));
        // now b and c both have one send and zero failures; c responded faster
        assert_eq!(tracker.select().unwrap().id, "c");
    }

    #[test]
    fn test_deactivation_at_max_failures() {
        let tracker = RotationTracker::new(vec![relay("a"), relay("b")]);
        tracker.mark_failure("a", 2);
        let snap = tracker.snapshot();
        assert!(snap[0].active);

        tracker.mark_failure("a", 2);
        let snap = tracker.snapshot();
        assert!(!snap[0].active);
        assert!(snap[0].seconds_since_last_failure.is_some());

        // further selections only return b
        assert_eq!(tracker.select().unwrap().id, "b");
        assert_eq!(tracker.select().unwrap().id, "b");
    }

    #[test]
    fn test_cooldown_reactivates_and_resets_failures() {
        let tracker = RotationTracker::new(vec![relay("a")])
            .with_cooldown(Duration::from_millis(20));
        tracker.mark_failure("a", 1);
        assert!(tracker.select().is_none());

        std::thread::sleep(Duration::from_millis(30));
        let picked = tracker.select().unwrap();
        assert_eq!(picked.id, "a");
        let snap = tracker.snapshot();
        assert!(snap[0].active);
        assert_eq!(snap[0].failure_count, 0);
    }

    #[test]
    fn test_inactive_relay_stays_out_before_cooldown() {
        let tracker =
            RotationTracker::new(vec![relay("a")]).with_cooldown(Duration::from_secs(3600));
        tracker.mark_failure("a", 1);
        assert!(tracker.select().is_none());
        assert!(tracker.select().is_none());
    }

    #[test]
    fn test_daily_limit_excludes_relay() {
        let mut capped = relay("a");
        capped.daily_limit = 2;
        let tracker = RotationTracker::new(vec![capped, relay("b")]);

        tracker.mark_success("a", Duration::from_millis(10));
        tracker.mark_success("a", Duration::from_millis(10));
        // a hit its cap; only b remains selectable
        assert_eq!(tracker.select().unwrap().id, "b");

        let snap = tracker.snapshot();
        assert_eq!(snap[0].sent_count, snap[0].daily_limit);
    }

    #[test]
    fn test_all_relays_exhausted_returns_none() {
        let mut capped = relay("a");
        capped.daily_limit = 1;
        let tracker = RotationTracker::new(vec![capped]);
        tracker.mark_success("a", Duration::from_millis(10));
        assert!(tracker.select().is_none());
    }

    #[test]
    fn test_success_decrements_failure_count() {
        let tracker = RotationTracker::new(vec![relay("a")]);
        tracker.mark_failure("a", 5);
        tracker.mark_failure("a", 5);
        tracker.mark_success("a", Duration::from_millis(10));

        let snap = tracker.snapshot();
        assert_eq!(snap[0].failure_count, 1);
        assert_eq!(snap[0].sent_count, 1);
    }

    #[test]
    fn test_cache_key() {
        let r = relay("a");
        assert_eq!(r.cache_key(), "a.example.com:587:sender@a.example.com");
    }
}
