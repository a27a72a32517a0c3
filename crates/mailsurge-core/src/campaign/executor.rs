//! Campaign executor
//!
//! One executor drives one campaign from admission to a terminal state:
//! iterate recipients in order, pick a relay, personalize, send, keep the
//! health tracker and counters current, pace between sends, then run a
//! bounded retry pass over transient failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::campaign::{Campaign, CampaignStatus, ErrorRecord};
use crate::personalize::Personalizer;
use crate::rotation::{RelayDescriptor, RotationTracker};
use crate::smtp::{FailureKind, SendFailure, TransportProvider};

/// Retry entries attempted after the main loop
const RETRY_PASS_LIMIT: usize = 5;

/// Fixed spacing between retry attempts
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct XCampaignId(String);

impl Header for XCampaignId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Campaign-ID")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct XMailer(String);

impl Header for XMailer {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailer")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pass {
    Main,
    Retry,
}

enum DeliveryOutcome {
    Delivered,
    Failed,
    NoRelay,
}

/// Drives one campaign to a terminal state
pub struct Executor {
    campaign: Arc<Campaign>,
    transports: Arc<dyn TransportProvider>,
    personalizer: Personalizer,
    relay_cooldown: Duration,
    retry_delay: Duration,
}

impl Executor {
    pub fn new(
        campaign: Arc<Campaign>,
        transports: Arc<dyn TransportProvider>,
        unsubscribe_base_url: String,
    ) -> Self {
        Self {
            campaign,
            transports,
            personalizer: Personalizer::new(unsubscribe_base_url),
            relay_cooldown: crate::rotation::DEFAULT_COOLDOWN,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override how long deactivated relays stay out of rotation
    pub fn with_relay_cooldown(mut self, cooldown: Duration) -> Self {
        self.relay_cooldown = cooldown;
        self
    }

    /// Override the spacing between retry attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run the campaign to completion. Per-recipient failures are absorbed;
    /// only relay exhaustion or an external stop ends the run early.
    pub async fn run(self) {
        let campaign = self.campaign.clone();

        if !campaign.set_status(CampaignStatus::Running) {
            // stopped before the first send; only bookkeeping remains
            campaign.set_current_recipient(None);
            return;
        }

        let tracker = Arc::new(
            RotationTracker::new(campaign.config.relays.clone())
                .with_cooldown(self.relay_cooldown),
        );
        campaign.set_rotation(tracker.clone());

        let total = campaign.config.recipients.len();
        campaign.log(format!(
            "Campaign started: {} recipients across {} relay(s)",
            total,
            tracker.len()
        ));
        info!(campaign = %campaign.id, recipients = total, "campaign started");

        for (index, recipient) in campaign.config.recipients.iter().enumerate() {
            if campaign.status() != CampaignStatus::Running {
                break;
            }
            campaign.set_current_recipient(Some(recipient.clone()));

            match self.deliver(&tracker, recipient, Pass::Main).await {
                DeliveryOutcome::NoRelay => {
                    campaign.log("Fatal: no active relay available".to_string());
                    error!(campaign = %campaign.id, "no active relay available, aborting");
                    campaign.set_status(CampaignStatus::Error);
                    break;
                }
                DeliveryOutcome::Delivered | DeliveryOutcome::Failed => {}
            }

            if index + 1 < total && campaign.status() == CampaignStatus::Running {
                sleep(campaign.config.delay).await;
            }
        }

        if campaign.status() == CampaignStatus::Running {
            self.retry_pass(&tracker).await;
        }

        campaign.set_status(CampaignStatus::Completed);
        let (sent, success, failed) = campaign.counters();
        campaign.log(format!(
            "Campaign finished ({}): {} sent, {} succeeded, {} failed",
            campaign.status(),
            sent,
            success,
            failed
        ));
        info!(
            campaign = %campaign.id,
            status = %campaign.status(),
            sent,
            success,
            failed,
            "campaign finished"
        );
        campaign.set_current_recipient(None);
    }

    /// Reattempt up to [`RETRY_PASS_LIMIT`] transient failures. Repeated
    /// failures are dropped rather than re-enqueued.
    async fn retry_pass(&self, tracker: &RotationTracker) {
        let campaign = &self.campaign;
        let retries = campaign.drain_retries(RETRY_PASS_LIMIT);
        if retries.is_empty() {
            return;
        }

        campaign.log(format!("Retrying {} recipient(s)", retries.len()));
        let count = retries.len();
        for (index, recipient) in retries.into_iter().enumerate() {
            if campaign.status() != CampaignStatus::Running {
                break;
            }
            campaign.set_current_recipient(Some(recipient.clone()));

            if let DeliveryOutcome::NoRelay = self.deliver(tracker, &recipient, Pass::Retry).await
            {
                campaign.log("Fatal: no active relay available".to_string());
                campaign.set_status(CampaignStatus::Error);
                break;
            }

            if index + 1 < count && campaign.status() == CampaignStatus::Running {
                sleep(self.retry_delay).await;
            }
        }
    }

    /// Select a relay, acquire its transport, personalize, and send
    async fn deliver(
        &self,
        tracker: &RotationTracker,
        recipient: &str,
        pass: Pass,
    ) -> DeliveryOutcome {
        let campaign = &self.campaign;

        let Some(relay) = tracker.select() else {
            return DeliveryOutcome::NoRelay;
        };

        let mailer = match self.transports.acquire(&relay).await {
            Ok(mailer) => mailer,
            Err(failure) => {
                tracker.mark_failure(&relay.id, campaign.config.max_failures_per_relay);
                if pass == Pass::Main {
                    campaign.record_sent_failure();
                }
                self.note_failure(recipient, &relay, &failure);
                return DeliveryOutcome::Failed;
            }
        };

        let personalization = {
            let mut rng = rand::thread_rng();
            self.personalizer.personalize(
                &campaign.config,
                &campaign.id,
                recipient,
                &relay.user,
                &mut rng,
            )
        };

        let message = match self.build_message(&personalization, recipient, &relay) {
            Ok(message) => message,
            Err(failure) => {
                if pass == Pass::Main {
                    campaign.record_sent_failure();
                }
                self.note_failure(recipient, &relay, &failure);
                return DeliveryOutcome::Failed;
            }
        };

        let started = Instant::now();
        match mailer.send(message).await {
            Ok(()) => {
                tracker.mark_success(&relay.id, started.elapsed());
                match pass {
                    Pass::Main => campaign.record_sent_success(),
                    Pass::Retry => campaign.record_retry_success(),
                }
                campaign.log(format!("✓ {} via {}", recipient, relay.name));
                DeliveryOutcome::Delivered
            }
            Err(failure) => {
                tracker.mark_failure(&relay.id, campaign.config.max_failures_per_relay);
                if pass == Pass::Main {
                    campaign.record_sent_failure();
                    if failure.is_retryable() {
                        campaign.push_retry(recipient);
                    }
                }
                self.note_failure(recipient, &relay, &failure);
                DeliveryOutcome::Failed
            }
        }
    }

    fn note_failure(&self, recipient: &str, relay: &RelayDescriptor, failure: &SendFailure) {
        let campaign = &self.campaign;
        let human = failure.human_message();
        campaign.record_error(ErrorRecord {
            recipient: recipient.to_string(),
            message: human.clone(),
            relay_name: relay.name.clone(),
            timestamp: Utc::now(),
        });
        campaign.log(format!("✗ {} via {}: {}", recipient, relay.name, human));
        warn!(
            campaign = %campaign.id,
            recipient,
            relay = %relay.name,
            error = %failure,
            "send failed"
        );
    }

    fn build_message(
        &self,
        personalization: &crate::personalize::Personalization,
        recipient: &str,
        relay: &RelayDescriptor,
    ) -> Result<Message, SendFailure> {
        let campaign = &self.campaign;

        let from_address = relay.user.parse().map_err(|e| {
            SendFailure::new(
                FailureKind::Message,
                format!("invalid relay user address: {e}"),
            )
        })?;
        let from = Mailbox::new(Some(personalization.from_name.clone()), from_address);

        let to: Mailbox = recipient.parse().map_err(|e| {
            SendFailure::new(FailureKind::Message, format!("invalid recipient: {e}"))
        })?;

        let reply_to = campaign
            .config
            .custom_reply_to
            .as_deref()
            .or(relay.reply_to.as_deref())
            .unwrap_or(&relay.user);

        let message_id = format!(
            "<{}.{}@mailsurge>",
            uuid::Uuid::new_v4(),
            Utc::now().timestamp()
        );

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(personalization.subject.clone())
            .message_id(Some(message_id))
            .header(XCampaignId(campaign.id.clone()))
            .header(XMailer(format!(
                "Mailsurge {}",
                env!("CARGO_PKG_VERSION")
            )))
            .header(ListUnsubscribe(
                self.personalizer.list_unsubscribe_header(recipient),
            ));

        if let Ok(reply_to) = reply_to.parse::<Mailbox>() {
            builder = builder.reply_to(reply_to);
        }

        let content_type = if campaign.config.is_html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        builder
            .header(content_type)
            .body(personalization.body.clone())
            .map_err(|e| SendFailure::new(FailureKind::Message, e.to_string()))
    }
}
