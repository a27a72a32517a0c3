//! Campaign registry
//!
//! Process-wide collection of campaign records. Admission enforces the
//! concurrency cap and spawns an executor per campaign; a periodic sweep
//! deletes terminal records once their retention window lapses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use mailsurge_common::config::EngineConfig;
use mailsurge_common::{Error, Result};

use crate::campaign::executor::Executor;
use crate::campaign::{Campaign, CampaignConfig, CampaignStatus, CampaignSubmission};
use crate::smtp::TransportProvider;
use crate::validate;

/// Aggregate view over all live records
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    pub total_sent: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub completed: usize,
    pub stopped: usize,
    pub errored: usize,
}

/// Process-wide campaign collection
pub struct Registry {
    campaigns: RwLock<HashMap<String, Arc<Campaign>>>,
    active: Arc<AtomicUsize>,
    transports: Arc<dyn TransportProvider>,
    config: EngineConfig,
}

impl Registry {
    pub fn new(config: EngineConfig, transports: Arc<dyn TransportProvider>) -> Arc<Self> {
        Arc::new(Self {
            campaigns: RwLock::new(HashMap::new()),
            active: Arc::new(AtomicUsize::new(0)),
            transports,
            config,
        })
    }

    /// Validate and admit a submission; starts an executor and returns the
    /// new campaign id
    pub async fn submit(&self, submission: CampaignSubmission) -> Result<String> {
        validate::validate_campaign(&submission)?;

        let limit = self.config.max_concurrent_campaigns;
        // atomic check-and-increment so racing submissions cannot overshoot
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < limit).then_some(active + 1)
            })
            .is_err()
        {
            return Err(Error::CampaignLimit(limit));
        }

        let id = new_campaign_id();
        let config = CampaignConfig::from_submission(
            submission,
            Duration::from_secs(self.config.default_delay_secs),
        );
        let campaign = Arc::new(Campaign::new(id.clone(), config));

        self.campaigns
            .write()
            .await
            .insert(id.clone(), campaign.clone());

        let executor = Executor::new(
            campaign.clone(),
            self.transports.clone(),
            self.config.unsubscribe_base_url.clone(),
        )
        .with_relay_cooldown(Duration::from_secs(self.config.relay_cooldown_secs));

        let active = self.active.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(executor.run()).await {
                warn!(campaign = %campaign.id, error = %e, "executor crashed");
                campaign.log("Fatal: executor crashed".to_string());
                campaign.set_status(CampaignStatus::Error);
                campaign.set_current_recipient(None);
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        info!(campaign = %id, "campaign admitted");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Campaign>> {
        self.campaigns.read().await.get(id).cloned()
    }

    /// Request a cooperative stop. `None` when the id is unknown, otherwise
    /// whether the campaign actually transitioned.
    pub async fn stop(&self, id: &str) -> Option<bool> {
        let campaign = self.get(id).await?;
        let stopped = campaign.request_stop();
        if stopped {
            info!(campaign = %id, "stop requested");
        }
        Some(stopped)
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn total_count(&self) -> usize {
        self.campaigns.read().await.len()
    }

    /// Totals across all live records
    pub async fn stats(&self) -> RegistryStats {
        let campaigns = self.campaigns.read().await;
        let mut stats = RegistryStats {
            total_campaigns: campaigns.len(),
            active_campaigns: self.active_count(),
            total_sent: 0,
            total_success: 0,
            total_failed: 0,
            completed: 0,
            stopped: 0,
            errored: 0,
        };
        for campaign in campaigns.values() {
            let (sent, success, failed) = campaign.counters();
            stats.total_sent += sent;
            stats.total_success += success;
            stats.total_failed += failed;
            match campaign.status() {
                CampaignStatus::Completed => stats.completed += 1,
                CampaignStatus::Stopped => stats.stopped += 1,
                CampaignStatus::Error => stats.errored += 1,
                CampaignStatus::Pending | CampaignStatus::Running => {}
            }
        }
        stats
    }

    /// Drop terminal records older than the retention window.
    /// Returns how many were removed.
    pub async fn gc(&self) -> usize {
        let retention = chrono::Duration::seconds(self.config.retention_secs as i64);
        let now = Utc::now();

        let mut campaigns = self.campaigns.write().await;
        let before = campaigns.len();
        campaigns
            .retain(|_, campaign| !(campaign.status().is_terminal() && now - campaign.start_time > retention));
        let removed = before - campaigns.len();
        if removed > 0 {
            info!(removed, "campaign records garbage collected");
        }
        removed
    }

    /// Run the periodic GC sweep until the process exits
    pub fn spawn_gc(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let period = Duration::from_secs(registry.config.gc_interval_secs);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let removed = registry.gc().await;
                debug!(removed, "gc sweep finished");
            }
        })
    }

    /// Signal every live campaign to stop and wait for executors to drain,
    /// then release pooled transports
    pub async fn shutdown(&self) {
        {
            let campaigns = self.campaigns.read().await;
            for campaign in campaigns.values() {
                campaign.request_stop();
            }
        }

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let deadline = tokio::time::Instant::now() + grace;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_count(),
                    "shutdown grace period elapsed with executors still running"
                );
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        self.transports.shutdown().await;
        info!("registry shut down");
    }
}

/// Opaque campaign id: epoch millis plus a short random suffix
fn new_campaign_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("campaign_{}_{}", Utc::now().timestamp_millis(), suffix)
}
