//! Campaign records and the submission wire format
//!
//! A live campaign is split into an immutable config block, an atomic
//! counter group, and a handful of short-lived locks (log ring, error list,
//! retry queue, current recipient). Status readers compose a snapshot from
//! those pieces without ever blocking the executor.

pub mod executor;
pub mod registry;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::rotation::{RelayDescriptor, RotationTracker, DEFAULT_DAILY_LIMIT};

/// Default failures before a relay is pulled from rotation
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Log lines kept per campaign
const LOG_CAPACITY: usize = 500;

/// Log lines surfaced on the status endpoint
pub const STATUS_LOG_LINES: usize = 50;

/// Errors surfaced on the status endpoint
pub const STATUS_ERROR_LINES: usize = 10;

/// Campaign lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Error,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Error
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => CampaignStatus::Pending,
            1 => CampaignStatus::Running,
            2 => CampaignStatus::Completed,
            3 => CampaignStatus::Stopped,
            _ => CampaignStatus::Error,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CampaignStatus::Pending => 0,
            CampaignStatus::Running => 1,
            CampaignStatus::Completed => 2,
            CampaignStatus::Stopped => 3,
            CampaignStatus::Error => 4,
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Running => "running",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Error => "error",
        };
        f.write_str(text)
    }
}

/// One relay in a campaign submission
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayInput {
    pub id: Option<String>,
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(alias = "pass")]
    pub secret: String,
    pub reply_to: Option<String>,
    pub daily_limit: Option<u32>,
}

impl RelayInput {
    /// Fill in id/name defaults; `index` numbers relays in list order
    pub fn into_descriptor(self, index: usize) -> RelayDescriptor {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("relay_{}", index + 1));
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.host.clone());
        RelayDescriptor {
            id,
            name,
            host: self.host,
            port: self.port,
            user: self.user,
            secret: self.secret,
            reply_to: self.reply_to,
            daily_limit: self.daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
        }
    }
}

/// Campaign submission as received on the wire
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CampaignSubmission {
    pub smtp_server: Option<RelayInput>,
    pub smtp_servers: Vec<RelayInput>,
    pub use_smtp_rotation: bool,
    pub rotation_frequency: Option<u32>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub content: String,
    #[serde(rename = "isHTML")]
    pub is_html: bool,
    pub delay_between_emails: Option<u64>,
    pub use_custom_subjects: bool,
    pub custom_subjects: Vec<String>,
    pub use_custom_senders: bool,
    pub custom_senders: Vec<String>,
    pub custom_reply_to: Option<String>,
    pub max_failures_per_server: Option<u32>,
    /// Accepted for compatibility; scheduling is first-come-first-served
    pub priority: Option<String>,
}

impl CampaignSubmission {
    /// The relay list this submission sends through
    pub fn relay_inputs(&self) -> Vec<RelayInput> {
        if self.use_smtp_rotation && !self.smtp_servers.is_empty() {
            self.smtp_servers.clone()
        } else {
            self.smtp_server.clone().into_iter().collect()
        }
    }
}

/// Immutable campaign inputs, fixed at admission
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub recipients: Vec<String>,
    pub subject_template: String,
    pub body_template: String,
    pub is_html: bool,
    pub delay: Duration,
    pub use_rotation: bool,
    pub rotation_frequency: Option<u32>,
    pub custom_subjects: Vec<String>,
    pub custom_senders: Vec<String>,
    pub custom_reply_to: Option<String>,
    pub max_failures_per_relay: u32,
    pub relays: Vec<RelayDescriptor>,
}

impl CampaignConfig {
    pub fn from_submission(submission: CampaignSubmission, default_delay: Duration) -> Self {
        let relays = submission
            .relay_inputs()
            .into_iter()
            .enumerate()
            .map(|(index, input)| input.into_descriptor(index))
            .collect();

        let custom_subjects = if submission.use_custom_subjects {
            submission.custom_subjects
        } else {
            Vec::new()
        };
        let custom_senders = if submission.use_custom_senders {
            submission.custom_senders
        } else {
            Vec::new()
        };

        Self {
            recipients: submission.recipients,
            subject_template: submission.subject,
            body_template: submission.content,
            is_html: submission.is_html,
            delay: submission
                .delay_between_emails
                .map(Duration::from_secs)
                .unwrap_or(default_delay),
            use_rotation: submission.use_smtp_rotation,
            rotation_frequency: submission.rotation_frequency,
            custom_subjects,
            custom_senders,
            custom_reply_to: submission.custom_reply_to,
            max_failures_per_relay: submission
                .max_failures_per_server
                .unwrap_or(DEFAULT_MAX_FAILURES),
            relays,
        }
    }
}

/// A captured per-recipient failure
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub recipient: String,
    pub message: String,
    pub relay_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded append-only log ring
#[derive(Debug)]
struct LogBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    fn tail(&self, count: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// A live campaign record
pub struct Campaign {
    pub id: String,
    pub config: CampaignConfig,
    pub start_time: DateTime<Utc>,
    started: Instant,
    status: AtomicU8,
    sent: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    logs: Mutex<LogBuffer>,
    errors: Mutex<Vec<ErrorRecord>>,
    retry_queue: Mutex<Vec<String>>,
    current_recipient: Mutex<Option<String>>,
    rotation: OnceLock<Arc<RotationTracker>>,
}

impl Campaign {
    pub fn new(id: String, config: CampaignConfig) -> Self {
        Self {
            id,
            config,
            start_time: Utc::now(),
            started: Instant::now(),
            status: AtomicU8::new(CampaignStatus::Pending.as_u8()),
            sent: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            logs: Mutex::new(LogBuffer::new(LOG_CAPACITY)),
            errors: Mutex::new(Vec::new()),
            retry_queue: Mutex::new(Vec::new()),
            current_recipient: Mutex::new(None),
            rotation: OnceLock::new(),
        }
    }

    pub fn status(&self) -> CampaignStatus {
        CampaignStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Transition to `next` unless the campaign is already terminal.
    /// Returns whether a transition happened.
    pub fn set_status(&self, next: CampaignStatus) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if CampaignStatus::from_u8(current).is_terminal() {
                return false;
            }
            match self.status.compare_exchange(
                current,
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Cooperative stop; the executor exits at its next status check
    pub fn request_stop(&self) -> bool {
        self.set_status(CampaignStatus::Stopped)
    }

    pub fn log(&self, line: impl Into<String>) {
        self.logs.lock().push(line.into());
    }

    pub fn record_error(&self, record: ErrorRecord) {
        self.errors.lock().push(record);
    }

    pub fn push_retry(&self, recipient: &str) {
        self.retry_queue.lock().push(recipient.to_string());
    }

    /// Take up to `max` entries off the retry queue, oldest first
    pub fn drain_retries(&self, max: usize) -> Vec<String> {
        let mut queue = self.retry_queue.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn retry_pending(&self) -> usize {
        self.retry_queue.lock().len()
    }

    pub fn set_current_recipient(&self, recipient: Option<String>) {
        *self.current_recipient.lock() = recipient;
    }

    pub fn current_recipient(&self) -> Option<String> {
        self.current_recipient.lock().clone()
    }

    pub fn record_sent_success(&self) {
        self.success.fetch_add(1, Ordering::SeqCst);
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_sent_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    /// A retry that went through converts an earlier failure into a success;
    /// `sent` stays put since the recipient was already counted.
    pub fn record_retry_success(&self) {
        self.success.fetch_add(1, Ordering::SeqCst);
        let mut failed = self.failed.load(Ordering::SeqCst);
        while failed > 0 {
            match self.failed.compare_exchange(
                failed,
                failed - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => failed = observed,
            }
        }
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.sent.load(Ordering::SeqCst),
            self.success.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }

    pub(crate) fn set_rotation(&self, tracker: Arc<RotationTracker>) {
        let _ = self.rotation.set(tracker);
    }

    pub fn rotation(&self) -> Option<&Arc<RotationTracker>> {
        self.rotation.get()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Compose a status snapshot; never blocks on the executor
    pub fn snapshot(&self) -> CampaignSnapshot {
        let (sent, success, failed) = self.counters();
        let total = self.config.recipients.len() as u64;
        let elapsed_minutes = self.elapsed().as_secs_f64() / 60.0;

        let speed = if elapsed_minutes > 0.0 {
            sent as f64 / elapsed_minutes
        } else {
            0.0
        };
        let remaining = total.saturating_sub(sent);
        let estimated_time_minutes = if remaining > 0 && speed > 0.0 {
            Some((remaining as f64 / speed).ceil() as u64)
        } else {
            None
        };

        let logs = self.logs.lock().tail(STATUS_LOG_LINES);
        let errors = {
            let errors = self.errors.lock();
            let skip = errors.len().saturating_sub(STATUS_ERROR_LINES);
            errors[skip..].to_vec()
        };

        CampaignSnapshot {
            id: self.id.clone(),
            status: self.status(),
            total_recipients: total,
            sent,
            success,
            failed,
            speed,
            remaining,
            estimated_time_minutes,
            current_recipient: self.current_recipient(),
            start_time: self.start_time,
            retry_pending: self.retry_pending(),
            logs,
            errors,
        }
    }
}

/// Point-in-time campaign view for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSnapshot {
    pub id: String,
    pub status: CampaignStatus,
    pub total_recipients: u64,
    pub sent: u64,
    pub success: u64,
    pub failed: u64,
    /// Emails per minute since the campaign started
    pub speed: f64,
    pub remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_minutes: Option<u64>,
    pub current_recipient: Option<String>,
    pub start_time: DateTime<Utc>,
    pub retry_pending: usize,
    pub logs: Vec<String>,
    pub errors: Vec<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CampaignConfig {
        CampaignConfig::from_submission(
            CampaignSubmission {
                recipients: vec!["a@x.io".to_string(), "b@x.io".to_string()],
                subject: "Hi".to_string(),
                content: "Body".to_string(),
                ..Default::default()
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_status_transitions_terminal_absorbing() {
        let campaign = Campaign::new("campaign_1".to_string(), config());
        assert_eq!(campaign.status(), CampaignStatus::Pending);

        assert!(campaign.set_status(CampaignStatus::Running));
        assert!(campaign.set_status(CampaignStatus::Completed));
        assert_eq!(campaign.status(), CampaignStatus::Completed);

        // terminal states absorb further transitions
        assert!(!campaign.set_status(CampaignStatus::Running));
        assert!(!campaign.request_stop());
        assert_eq!(campaign.status(), CampaignStatus::Completed);
    }

    #[test]
    fn test_stop_on_terminal_is_noop() {
        let campaign = Campaign::new("campaign_1".to_string(), config());
        campaign.set_status(CampaignStatus::Running);
        assert!(campaign.request_stop());
        assert!(!campaign.request_stop());
        assert_eq!(campaign.status(), CampaignStatus::Stopped);
    }

    #[test]
    fn test_counters_stay_consistent() {
        let campaign = Campaign::new("campaign_1".to_string(), config());
        campaign.record_sent_success();
        campaign.record_sent_failure();
        let (sent, success, failed) = campaign.counters();
        assert_eq!(sent, success + failed);
        assert_eq!(sent, 2);

        campaign.record_retry_success();
        let (sent, success, failed) = campaign.counters();
        assert_eq!(sent, 2);
        assert_eq!(success, 2);
        assert_eq!(failed, 0);
        assert_eq!(sent, success + failed);
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let mut buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(format!("line {i}"));
        }
        assert_eq!(buffer.entries.len(), 3);
        assert_eq!(buffer.tail(2), vec!["line 3".to_string(), "line 4".to_string()]);
    }

    #[test]
    fn test_drain_retries_caps_and_preserves_order() {
        let campaign = Campaign::new("campaign_1".to_string(), config());
        for addr in ["a@x.io", "b@x.io", "c@x.io"] {
            campaign.push_retry(addr);
        }
        let drained = campaign.drain_retries(2);
        assert_eq!(drained, vec!["a@x.io".to_string(), "b@x.io".to_string()]);
        assert_eq!(campaign.retry_pending(), 1);
    }

    #[test]
    fn test_snapshot_derives_remaining() {
        let campaign = Campaign::new("campaign_1".to_string(), config());
        campaign.record_sent_success();
        let snapshot = campaign.snapshot();
        assert_eq!(snapshot.total_recipients, 2);
        assert_eq!(snapshot.remaining, 1);
        assert_eq!(snapshot.sent, 1);
    }

    #[test]
    fn test_relay_input_defaults() {
        let descriptor = RelayInput {
            host: "mx.example.com".to_string(),
            port: 587,
            user: "ops@example.com".to_string(),
            secret: "hunter2".to_string(),
            ..Default::default()
        }
        .into_descriptor(0);

        assert_eq!(descriptor.id, "relay_1");
        assert_eq!(descriptor.name, "mx.example.com");
        assert_eq!(descriptor.daily_limit, DEFAULT_DAILY_LIMIT);
    }

    #[test]
    fn test_custom_pools_require_flags() {
        let submission = CampaignSubmission {
            recipients: vec!["a@x.io".to_string()],
            subject: "Hi".to_string(),
            content: "Body".to_string(),
            custom_subjects: vec!["Ignored".to_string()],
            use_custom_subjects: false,
            ..Default::default()
        };
        let config = CampaignConfig::from_submission(submission, Duration::from_secs(5));
        assert!(config.custom_subjects.is_empty());
    }
}
