//! Campaign Scheduler - recurring triggers and single-flight execution
//!
//! Registers one recurring trigger per active campaign (plus the system-wide
//! daily counter reset), resolves the sending accounts for each firing, and
//! guards every run so a campaign never executes concurrently with itself.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::delivery::AccountSelector;
use crate::executor::{CampaignExecutor, ExecutionRecord};
use crate::limiter::RateLimiter;
use crate::repository::CampaignRepository;
use crate::trigger::{daily_expression, TriggerCallback, TriggerEngine, TriggerHandle};
use sendrust_common::config::{QuotaConfig, SchedulerConfig};
use sendrust_common::types::{AccountId, Campaign, CampaignId, CampaignStatus};
use sendrust_common::{Error, Result};

/// Outcome of a manual (run-now) request
#[derive(Debug)]
pub enum RunOutcome {
    /// The run went through; the full record is attached.
    Completed(Box<ExecutionRecord>),
    /// The campaign is already mid-run; nothing was started.
    AlreadyRunning,
}

/// One registered trigger, visible through [`CampaignScheduler::status`]
#[derive(Debug, Clone)]
pub struct ScheduledInfo {
    pub campaign_id: CampaignId,
    pub expression: String,
    pub timezone: String,
    pub registered_at: DateTime<Utc>,
}

/// Snapshot of the scheduler's registries
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub scheduled: Vec<ScheduledInfo>,
    pub executing: Vec<CampaignId>,
}

struct ScheduledTrigger {
    handle: TriggerHandle,
    expression: String,
    timezone: String,
    registered_at: DateTime<Utc>,
}

/// Tracks which campaigns are mid-run; `try_begin` hands out a guard that
/// releases the slot on drop, so a panicking run cannot wedge its campaign.
#[derive(Clone, Default)]
struct ExecutionRegistry {
    running: Arc<Mutex<HashSet<CampaignId>>>,
}

impl ExecutionRegistry {
    fn try_begin(&self, campaign_id: CampaignId) -> Option<ExecutionGuard> {
        let mut running = lock_unpoisoned(&self.running);
        if running.insert(campaign_id) {
            Some(ExecutionGuard {
                registry: self.clone(),
                campaign_id,
            })
        } else {
            None
        }
    }

    fn snapshot(&self) -> Vec<CampaignId> {
        lock_unpoisoned(&self.running).iter().copied().collect()
    }
}

struct ExecutionGuard {
    registry: ExecutionRegistry,
    campaign_id: CampaignId,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        lock_unpoisoned(&self.registry.running).remove(&self.campaign_id);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owns the trigger registry and the single-flight execution registry.
pub struct CampaignScheduler {
    campaigns: Arc<dyn CampaignRepository>,
    accounts: Arc<dyn AccountSelector>,
    executor: Arc<CampaignExecutor>,
    limiter: Arc<RateLimiter>,
    triggers: Arc<dyn TriggerEngine>,
    config: SchedulerConfig,
    hard_ceiling: i32,
    scheduled: Mutex<HashMap<CampaignId, ScheduledTrigger>>,
    reset_trigger: Mutex<Option<TriggerHandle>>,
    registry: ExecutionRegistry,
}

impl CampaignScheduler {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        accounts: Arc<dyn AccountSelector>,
        executor: Arc<CampaignExecutor>,
        limiter: Arc<RateLimiter>,
        triggers: Arc<dyn TriggerEngine>,
        config: SchedulerConfig,
        quota: &QuotaConfig,
    ) -> Self {
        Self {
            campaigns,
            accounts,
            executor,
            limiter,
            triggers,
            config,
            hard_ceiling: quota.campaign_hard_ceiling,
            scheduled: Mutex::new(HashMap::new()),
            reset_trigger: Mutex::new(None),
            registry: ExecutionRegistry::default(),
        }
    }

    /// Register the daily counter reset and a trigger for every active,
    /// schedule-enabled campaign. Returns how many campaigns were scheduled;
    /// a campaign with a broken schedule is logged and skipped.
    pub async fn initialize(&self) -> Result<usize> {
        self.register_reset_trigger()?;

        let campaigns = self.campaigns.list_active().await?;
        let mut count = 0;
        for campaign in &campaigns {
            if !campaign.can_trigger() {
                continue;
            }
            match self.schedule_campaign(campaign) {
                Ok(()) => count += 1,
                Err(e) => {
                    warn!(campaign_id = %campaign.id, "Skipping unschedulable campaign: {}", e)
                }
            }
        }
        info!(scheduled = count, "Scheduler initialized");
        Ok(count)
    }

    fn register_reset_trigger(&self) -> Result<()> {
        let expression = daily_expression(&self.config.daily_reset_time)?;
        let limiter = self.limiter.clone();
        let callback: TriggerCallback = Arc::new(move || {
            let limiter = limiter.clone();
            Box::pin(async move {
                match limiter.reset_expired().await {
                    Ok(purged) => info!(purged, "Daily quota reset completed"),
                    Err(e) => warn!("Daily quota reset failed: {}", e),
                }
            })
        });
        let handle = self.triggers.schedule(&expression, "UTC", callback)?;
        *lock_unpoisoned(&self.reset_trigger) = Some(handle);
        Ok(())
    }

    /// Register (or replace) the recurring trigger for `campaign`.
    pub fn schedule_campaign(&self, campaign: &Campaign) -> Result<()> {
        if !campaign.can_trigger() {
            return Err(Error::Validation(format!(
                "Campaign {} is not active with an enabled schedule",
                campaign.id
            )));
        }

        let expression = match &campaign.schedule.cron_expression {
            Some(raw) => raw.clone(),
            None => daily_expression(&campaign.schedule.send_time)?,
        };
        let timezone = if campaign.schedule.timezone.is_empty() {
            self.config.default_timezone.clone()
        } else {
            campaign.schedule.timezone.clone()
        };

        // The old trigger must be dead before the replacement registers,
        // otherwise both can fire in the same window.
        if let Some(old) = lock_unpoisoned(&self.scheduled).remove(&campaign.id) {
            old.handle.stop();
        }

        let callback = self.trigger_callback(campaign.id);
        let handle = self.triggers.schedule(&expression, &timezone, callback)?;

        lock_unpoisoned(&self.scheduled).insert(
            campaign.id,
            ScheduledTrigger {
                handle,
                expression: expression.clone(),
                timezone: timezone.clone(),
                registered_at: Utc::now(),
            },
        );
        info!(campaign_id = %campaign.id, %expression, %timezone, "Campaign scheduled");
        Ok(())
    }

    /// What a trigger firing actually does: re-resolve the campaign (it may
    /// have been paused or deleted since registration), pick accounts, and
    /// run under the single-flight guard.
    fn trigger_callback(&self, campaign_id: CampaignId) -> TriggerCallback {
        let campaigns = self.campaigns.clone();
        let accounts = self.accounts.clone();
        let executor = self.executor.clone();
        let registry = self.registry.clone();
        let ceiling = self.hard_ceiling;

        Arc::new(move || {
            let campaigns = campaigns.clone();
            let accounts = accounts.clone();
            let executor = executor.clone();
            let registry = registry.clone();
            Box::pin(async move {
                let campaign = match campaigns.find(campaign_id).await {
                    Ok(Some(c)) if c.can_trigger() => c,
                    Ok(_) => {
                        info!(%campaign_id, "Trigger fired but campaign is no longer triggerable");
                        return;
                    }
                    Err(e) => {
                        warn!(%campaign_id, "Trigger fired but campaign lookup failed: {}", e);
                        return;
                    }
                };

                let sending = match accounts.select_accounts().await {
                    Ok(list) if !list.is_empty() => list,
                    Ok(_) => {
                        warn!(%campaign_id, "Trigger fired but no sending accounts are available");
                        return;
                    }
                    Err(e) => {
                        warn!(%campaign_id, "Trigger fired but account selection failed: {}", e);
                        return;
                    }
                };

                let Some(_guard) = registry.try_begin(campaign_id) else {
                    info!(%campaign_id, "Previous run still in flight, skipping this firing");
                    return;
                };

                let limit = campaign.effective_daily_limit(ceiling);
                executor
                    .execute(campaign_id, &sending[0], limit, &sending)
                    .await;
            })
        })
    }

    /// Tear down the campaign's trigger. Returns whether one was registered.
    pub fn unschedule_campaign(&self, campaign_id: CampaignId) -> bool {
        match lock_unpoisoned(&self.scheduled).remove(&campaign_id) {
            Some(trigger) => {
                trigger.handle.stop();
                info!(%campaign_id, "Campaign unscheduled");
                true
            }
            None => false,
        }
    }

    /// Run a campaign immediately, outside its schedule. Falls back to the
    /// account selector when `accounts` is empty, and reports
    /// [`RunOutcome::AlreadyRunning`] instead of stacking a second run.
    pub async fn execute_campaign_now(
        &self,
        campaign_id: CampaignId,
        accounts: &[AccountId],
    ) -> Result<RunOutcome> {
        let campaign = self
            .campaigns
            .find(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Campaign not found: {}", campaign_id)))?;
        if campaign.status != CampaignStatus::Active {
            return Err(Error::Validation(format!(
                "Campaign {} is not active",
                campaign_id
            )));
        }

        let sending = if accounts.is_empty() {
            self.accounts.select_accounts().await?
        } else {
            accounts.to_vec()
        };
        if sending.is_empty() {
            return Err(Error::Validation(
                "No sending accounts available".to_string(),
            ));
        }

        let Some(_guard) = self.registry.try_begin(campaign_id) else {
            return Ok(RunOutcome::AlreadyRunning);
        };

        let limit = campaign.effective_daily_limit(self.hard_ceiling);
        let record = self
            .executor
            .execute(campaign_id, &sending[0], limit, &sending)
            .await;
        Ok(RunOutcome::Completed(Box::new(record)))
    }

    /// Snapshot both registries.
    pub fn status(&self) -> SchedulerStatus {
        let scheduled = lock_unpoisoned(&self.scheduled)
            .iter()
            .map(|(id, t)| ScheduledInfo {
                campaign_id: *id,
                expression: t.expression.clone(),
                timezone: t.timezone.clone(),
                registered_at: t.registered_at,
            })
            .collect();
        SchedulerStatus {
            scheduled,
            executing: self.registry.snapshot(),
        }
    }

    /// Stop every campaign trigger and the reset trigger. Returns how many
    /// campaign triggers were torn down.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<_> = lock_unpoisoned(&self.scheduled).drain().collect();
        for (_, trigger) in &drained {
            trigger.handle.stop();
        }
        if let Some(reset) = lock_unpoisoned(&self.reset_trigger).take() {
            reset.stop();
        }
        info!(stopped = drained.len(), "Scheduler stopped");
        drained.len()
    }
}
