//! Campaign Executor - one rate-limited, paced run of a campaign
//!
//! Orchestrates contact selection, per-target quota re-checks, delivery,
//! failure bookkeeping, and pacing. Every invocation produces a finalized
//! `ExecutionRecord`; unexpected errors are captured into the record rather
//! than escaping the core.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::delay::MessageDelayer;
use crate::delivery::{DeliveryResult, MessageDelivery};
use crate::limiter::RateLimiter;
use crate::repository::CampaignRepository;
use crate::targeting::ContactSelector;
use sendrust_common::types::{AccountId, Campaign, CampaignId, ExecutionId, FailedSend, RetryPolicy, Target};
use sendrust_common::{Error, Result};

/// Per-target outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Sent,
    Failed,
    Skipped,
}

/// One line of the per-target outcome log
#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub recipient_id: String,
    pub account_id: Option<AccountId>,
    pub status: TargetStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Terminal state of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Derived summary of a finalized execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub total_targets: usize,
    /// successes / total targets
    pub success_rate: f64,
    /// successes / elapsed seconds
    pub throughput_per_sec: f64,
}

/// One run of a campaign, from start through finalization
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub campaign_id: CampaignId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub outcomes: Vec<TargetOutcome>,
    /// How many sends each sending account carried
    pub account_assignments: HashMap<AccountId, i32>,
    pub sent: i32,
    pub failed: i32,
    pub skipped: i32,
}

impl ExecutionRecord {
    fn start(campaign_id: CampaignId) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Running,
            error: None,
            outcomes: Vec::new(),
            account_assignments: HashMap::new(),
            sent: 0,
            failed: 0,
            skipped: 0,
        }
    }

    fn log_sent(&mut self, recipient_id: &str, account_id: &AccountId) {
        self.sent += 1;
        *self
            .account_assignments
            .entry(account_id.clone())
            .or_insert(0) += 1;
        self.outcomes.push(TargetOutcome {
            recipient_id: recipient_id.to_string(),
            account_id: Some(account_id.clone()),
            status: TargetStatus::Sent,
            reason: None,
            at: Utc::now(),
        });
    }

    fn log_failed(&mut self, recipient_id: &str, account_id: &AccountId, reason: String) {
        self.failed += 1;
        self.outcomes.push(TargetOutcome {
            recipient_id: recipient_id.to_string(),
            account_id: Some(account_id.clone()),
            status: TargetStatus::Failed,
            reason: Some(reason),
            at: Utc::now(),
        });
    }

    fn log_skipped(&mut self, recipient_id: &str, reason: &str) {
        self.skipped += 1;
        self.outcomes.push(TargetOutcome {
            recipient_id: recipient_id.to_string(),
            account_id: None,
            status: TargetStatus::Skipped,
            reason: Some(reason.to_string()),
            at: Utc::now(),
        });
    }

    fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
        if self.status == ExecutionStatus::Running {
            self.status = ExecutionStatus::Completed;
        }
    }

    /// Success rate and throughput over the finalized run.
    pub fn summary(&self) -> ExecutionSummary {
        let total = self.outcomes.len();
        let success_rate = if total == 0 {
            0.0
        } else {
            self.sent as f64 / total as f64
        };
        let elapsed = self
            .finished_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0) as f64
            / 1_000.0;
        let throughput_per_sec = if elapsed > 0.0 {
            self.sent as f64 / elapsed
        } else {
            0.0
        };
        ExecutionSummary {
            total_targets: total,
            success_rate,
            throughput_per_sec,
        }
    }
}

/// Orchestrates one campaign run end to end.
pub struct CampaignExecutor {
    campaigns: Arc<dyn CampaignRepository>,
    contacts: Arc<dyn ContactSelector>,
    delivery: Arc<dyn MessageDelivery>,
    limiter: Arc<RateLimiter>,
    delayer: Arc<MessageDelayer>,
    /// In-loop retry budget for the `immediate` policy
    max_immediate_retries: u32,
}

impl CampaignExecutor {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        contacts: Arc<dyn ContactSelector>,
        delivery: Arc<dyn MessageDelivery>,
        limiter: Arc<RateLimiter>,
        delayer: Arc<MessageDelayer>,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            delivery,
            limiter,
            delayer,
            max_immediate_retries: 3,
        }
    }

    /// Set the in-loop retry budget for the `immediate` policy.
    pub fn with_max_immediate_retries(mut self, retries: u32) -> Self {
        self.max_immediate_retries = retries;
        self
    }

    /// Run the campaign once. Always returns a finalized record; quota
    /// exhaustion and empty target lists are normal completed outcomes.
    pub async fn execute(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        daily_limit: i32,
        available_accounts: &[AccountId],
    ) -> ExecutionRecord {
        let mut record = ExecutionRecord::start(campaign_id);
        info!(%campaign_id, execution = %record.id, "Execution started");

        if let Err(e) = self
            .run(&mut record, campaign_id, account_id, daily_limit, available_accounts)
            .await
        {
            error!(%campaign_id, execution = %record.id, "Execution failed: {}", e);
            record.status = ExecutionStatus::Failed;
            record.error = Some(e.to_string());
        }

        record.finalize();
        let summary = record.summary();
        info!(
            %campaign_id,
            execution = %record.id,
            sent = record.sent,
            failed = record.failed,
            skipped = record.skipped,
            success_rate = summary.success_rate,
            "Execution finalized"
        );

        if record.error.is_none() || record.sent + record.failed + record.skipped > 0 {
            if let Err(e) = self
                .campaigns
                .record_run(
                    campaign_id,
                    record.sent,
                    record.failed,
                    record.skipped,
                    record.finished_at.unwrap_or_else(Utc::now),
                )
                .await
            {
                warn!(%campaign_id, "Failed to record run statistics: {}", e);
            }
        }

        record
    }

    async fn run(
        &self,
        record: &mut ExecutionRecord,
        campaign_id: CampaignId,
        account_id: &AccountId,
        daily_limit: i32,
        available_accounts: &[AccountId],
    ) -> Result<()> {
        let campaign = self
            .campaigns
            .find(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Campaign not found: {}", campaign_id)))?;

        let remaining = self
            .limiter
            .remaining_quota(campaign_id, account_id, daily_limit)
            .await?
            .campaign;
        if remaining == 0 {
            info!(%campaign_id, "Daily quota already exhausted, nothing to send");
            return Ok(());
        }

        let targets = self
            .contacts
            .select_targets(&campaign.target_filter, remaining as usize)
            .await?;
        if targets.is_empty() {
            info!(%campaign_id, "No targets matched the campaign filter");
            return Ok(());
        }

        let accounts: Vec<AccountId> = if available_accounts.is_empty() {
            vec![account_id.clone()]
        } else {
            available_accounts.to_vec()
        };

        self.delayer.reset_batch_counter();

        let batch = targets.len().min(remaining as usize);
        for (i, target) in targets.iter().take(batch).enumerate() {
            let account = &accounts[i % accounts.len()];

            // Quota can be consumed underneath us by sibling campaigns
            // sharing the account; a denial means it is gone for everyone.
            let decision = self.limiter.can_send(campaign_id, account, daily_limit).await;
            if !decision.allowed {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "quota denied".to_string());
                info!(%campaign_id, %account, "Quota denied mid-run, stopping: {}", reason);
                for leftover in targets.iter().take(batch).skip(i) {
                    record.log_skipped(&leftover.recipient_id, &reason);
                }
                break;
            }

            self.send_one(record, &campaign, target, account).await;

            if i + 1 < batch {
                let pause = self.delayer.next_delay(0);
                self.delayer.wait(pause).await;
            }
        }

        Ok(())
    }

    /// Deliver to a single target, applying the campaign's retry policy.
    async fn send_one(
        &self,
        record: &mut ExecutionRecord,
        campaign: &Campaign,
        target: &Target,
        account: &AccountId,
    ) {
        let message = &campaign.message_template;

        let mut attempt: u32 = 0;
        let mut last_error;
        loop {
            match self
                .delivery
                .deliver(&target.recipient_id, account, message)
                .await
            {
                DeliveryResult::Sent { .. } => {
                    if let Err(e) = self.limiter.record_sent(campaign.id, account).await {
                        warn!(campaign_id = %campaign.id, "Failed to count sent message: {}", e);
                    }
                    record.log_sent(&target.recipient_id, account);
                    return;
                }
                DeliveryResult::Failed { error } => {
                    warn!(
                        campaign_id = %campaign.id,
                        recipient = %target.recipient_id,
                        attempt,
                        "Delivery failed: {}",
                        error
                    );
                    last_error = error;
                }
            }

            if campaign.retry_policy != RetryPolicy::Immediate
                || attempt >= self.max_immediate_retries
            {
                break;
            }
            attempt += 1;
            let backoff = self.delayer.next_delay(attempt);
            self.delayer.wait(backoff).await;
        }

        let retry_entry = match campaign.retry_policy {
            RetryPolicy::Never => None,
            RetryPolicy::NextDay | RetryPolicy::Immediate => Some(FailedSend {
                recipient_id: target.recipient_id.clone(),
                message: message.clone(),
                failed_at: Utc::now(),
                reason: last_error.clone(),
                retry_count: attempt,
            }),
        };
        if let Err(e) = self
            .limiter
            .record_failure(campaign.id, account, retry_entry)
            .await
        {
            warn!(campaign_id = %campaign.id, "Failed to book delivery failure: {}", e);
        }
        record.log_failed(&target.recipient_id, account, last_error);
    }
}
