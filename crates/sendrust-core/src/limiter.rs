//! Rate Limiter - two-tier quota enforcement per campaign and per sending account

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::quota::QuotaStore;
use sendrust_common::types::{AccountId, CampaignId, FailedSend};
use sendrust_common::Result;

/// Outcome of a permission check. Denial is control flow, not an error.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub campaign_remaining: i32,
    pub account_remaining: i32,
    pub next_reset_at: Option<DateTime<Utc>>,
}

impl QuotaDecision {
    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            campaign_remaining: 0,
            account_remaining: 0,
            next_reset_at: None,
        }
    }
}

/// Read-only projection of today's remaining quota
#[derive(Debug, Clone)]
pub struct RemainingQuota {
    pub campaign: i32,
    pub account: i32,
}

impl RemainingQuota {
    /// The binding constraint across both tiers.
    pub fn min(&self) -> i32 {
        self.campaign.min(self.account)
    }
}

/// Read-only projection of an account's day across all campaigns
#[derive(Debug, Clone)]
pub struct AccountStats {
    pub account_id: AccountId,
    pub day: NaiveDate,
    pub total_sent: i32,
    pub total_failed: i32,
    pub daily_cap: i32,
    pub remaining: i32,
    pub campaigns: usize,
}

/// Rate limiter combining the campaign-level daily cap with the
/// platform-wide per-account ceiling.
///
/// Storage errors never allow a send: any failure during a check surfaces as
/// a denial carrying the error text as the reason.
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    account_daily_cap: i32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn QuotaStore>, account_daily_cap: i32) -> Self {
        Self {
            store,
            account_daily_cap,
        }
    }

    /// Evaluate whether one send is permitted right now.
    ///
    /// The campaign check runs first; the first failing check's reason wins.
    /// No side effects beyond the lazy counter creation.
    pub async fn can_send(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        campaign_daily_limit: i32,
    ) -> QuotaDecision {
        let day = Utc::now().date_naive();

        let counter = match self.store.get_or_create(campaign_id, account_id, day).await {
            Ok(counter) => counter,
            Err(e) => {
                warn!(%campaign_id, %account_id, "Quota check failed, denying send: {}", e);
                return QuotaDecision::denied(e.to_string());
            }
        };

        let account_total = match self.store.sum_sent_for_account(account_id, day).await {
            Ok(total) => total,
            Err(e) => {
                warn!(%account_id, "Account quota check failed, denying send: {}", e);
                return QuotaDecision::denied(e.to_string());
            }
        };

        let campaign_remaining = (campaign_daily_limit - counter.sent_count).max(0);
        let account_remaining = (self.account_daily_cap - account_total).max(0);

        if counter.sent_count >= campaign_daily_limit {
            debug!(
                %campaign_id,
                sent = counter.sent_count,
                limit = campaign_daily_limit,
                "Campaign daily limit reached"
            );
            return QuotaDecision {
                allowed: false,
                reason: Some(format!(
                    "Campaign daily limit reached ({}/{})",
                    counter.sent_count, campaign_daily_limit
                )),
                campaign_remaining: 0,
                account_remaining,
                next_reset_at: Some(counter.reset_at),
            };
        }

        if account_total >= self.account_daily_cap {
            debug!(
                %account_id,
                sent = account_total,
                cap = self.account_daily_cap,
                "Account daily cap reached"
            );
            return QuotaDecision {
                allowed: false,
                reason: Some(format!(
                    "Account daily cap reached ({}/{})",
                    account_total, self.account_daily_cap
                )),
                campaign_remaining,
                account_remaining: 0,
                next_reset_at: Some(counter.reset_at),
            };
        }

        QuotaDecision {
            allowed: true,
            reason: None,
            campaign_remaining,
            account_remaining,
            next_reset_at: Some(counter.reset_at),
        }
    }

    /// Count one confirmed successful delivery.
    pub async fn record_sent(&self, campaign_id: CampaignId, account_id: &AccountId) -> Result<()> {
        let day = Utc::now().date_naive();
        let counter = self.store.get_or_create(campaign_id, account_id, day).await?;
        self.store.increment_sent(counter.id, 1).await
    }

    /// Count one failed delivery; `retry_entry` lands in the day's failure
    /// queue when the campaign's retry policy wants a later attempt.
    pub async fn record_failure(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        retry_entry: Option<FailedSend>,
    ) -> Result<()> {
        let day = Utc::now().date_naive();
        let counter = self.store.get_or_create(campaign_id, account_id, day).await?;
        self.store.increment_failed(counter.id, 1).await?;
        if let Some(entry) = retry_entry {
            self.store.push_failed(counter.id, entry).await?;
        }
        Ok(())
    }

    /// Read-only remaining-quota projection for both tiers.
    pub async fn remaining_quota(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        campaign_daily_limit: i32,
    ) -> Result<RemainingQuota> {
        let day = Utc::now().date_naive();
        let counter = self.store.get_or_create(campaign_id, account_id, day).await?;
        let account_total = self.store.sum_sent_for_account(account_id, day).await?;
        Ok(RemainingQuota {
            campaign: (campaign_daily_limit - counter.sent_count).max(0),
            account: (self.account_daily_cap - account_total).max(0),
        })
    }

    /// Read-only account-wide projection for reporting.
    pub async fn account_stats(&self, account_id: &AccountId) -> Result<AccountStats> {
        let day = Utc::now().date_naive();
        let counters = self.store.counters_for_account(account_id, day).await?;
        let total_sent: i32 = counters.iter().map(|c| c.sent_count).sum();
        let total_failed: i32 = counters.iter().map(|c| c.failed_count).sum();
        Ok(AccountStats {
            account_id: account_id.clone(),
            day,
            total_sent,
            total_failed,
            daily_cap: self.account_daily_cap,
            remaining: (self.account_daily_cap - total_sent).max(0),
            campaigns: counters.len(),
        })
    }

    /// Bulk daily reset, delegated to the store.
    pub async fn reset_expired(&self) -> Result<u64> {
        self.store.reset_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::MemoryQuotaStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sendrust_common::types::{CounterId, QuotaCounter};
    use sendrust_common::Error;
    use uuid::Uuid;

    fn limiter_with_cap(cap: i32) -> (RateLimiter, Arc<MemoryQuotaStore>) {
        let store = Arc::new(MemoryQuotaStore::default());
        (RateLimiter::new(store.clone(), cap), store)
    }

    #[tokio::test]
    async fn test_allows_under_both_limits() {
        let (limiter, _) = limiter_with_cap(100);
        let decision = limiter
            .can_send(Uuid::new_v4(), &"5511990001".to_string(), 10)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.campaign_remaining, 10);
        assert_eq!(decision.account_remaining, 100);
        assert!(decision.next_reset_at.is_some());
    }

    #[tokio::test]
    async fn test_campaign_limit_denies_first() {
        let (limiter, _) = limiter_with_cap(100);
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();

        for _ in 0..3 {
            limiter.record_sent(campaign, &account).await.unwrap();
        }

        let decision = limiter.can_send(campaign, &account, 3).await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Campaign daily limit"));
        assert_eq!(decision.campaign_remaining, 0);
    }

    #[tokio::test]
    async fn test_account_cap_sums_across_campaigns() {
        let (limiter, _) = limiter_with_cap(5);
        let account = "5511990001".to_string();

        // Two campaigns share the account; together they exhaust the cap.
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        for _ in 0..3 {
            limiter.record_sent(first, &account).await.unwrap();
        }
        for _ in 0..2 {
            limiter.record_sent(second, &account).await.unwrap();
        }

        let decision = limiter.can_send(Uuid::new_v4(), &account, 10).await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Account daily cap"));
        assert_eq!(decision.account_remaining, 0);
        // The campaign tier itself still had room
        assert_eq!(decision.campaign_remaining, 10);
    }

    #[tokio::test]
    async fn test_denied_check_has_no_side_effects() {
        let (limiter, store) = limiter_with_cap(100);
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();

        limiter.record_sent(campaign, &account).await.unwrap();
        let _ = limiter.can_send(campaign, &account, 1).await;
        let _ = limiter.can_send(campaign, &account, 1).await;

        let day = Utc::now().date_naive();
        let counter = store.get_or_create(campaign, &account, day).await.unwrap();
        assert_eq!(counter.sent_count, 1);
    }

    #[tokio::test]
    async fn test_record_failure_books_queue_and_count() {
        let (limiter, store) = limiter_with_cap(100);
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();

        limiter
            .record_failure(
                campaign,
                &account,
                Some(FailedSend {
                    recipient_id: "r9".into(),
                    message: "hi".into(),
                    failed_at: Utc::now(),
                    reason: "timeout".into(),
                    retry_count: 0,
                }),
            )
            .await
            .unwrap();

        let day = Utc::now().date_naive();
        let counter = store.get_or_create(campaign, &account, day).await.unwrap();
        assert_eq!(counter.failed_count, 1);
        assert_eq!(counter.failed_queue.len(), 1);
        assert_eq!(counter.failed_queue[0].recipient_id, "r9");
    }

    #[tokio::test]
    async fn test_remaining_quota_projection() {
        let (limiter, _) = limiter_with_cap(20);
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();

        for _ in 0..4 {
            limiter.record_sent(campaign, &account).await.unwrap();
        }

        let remaining = limiter.remaining_quota(campaign, &account, 10).await.unwrap();
        assert_eq!(remaining.campaign, 6);
        assert_eq!(remaining.account, 16);
        assert_eq!(remaining.min(), 6);

        let stats = limiter.account_stats(&account).await.unwrap();
        assert_eq!(stats.total_sent, 4);
        assert_eq!(stats.remaining, 16);
        assert_eq!(stats.campaigns, 1);
    }

    /// Store that fails every operation, for fail-closed checks.
    struct BrokenStore;

    #[async_trait]
    impl QuotaStore for BrokenStore {
        async fn get_or_create(
            &self,
            _campaign_id: CampaignId,
            _account_id: &AccountId,
            _day: NaiveDate,
        ) -> Result<QuotaCounter> {
            Err(Error::Store("connection refused".into()))
        }

        async fn increment_sent(&self, _counter_id: CounterId, _delta: i32) -> Result<()> {
            Err(Error::Store("connection refused".into()))
        }

        async fn increment_failed(&self, _counter_id: CounterId, _delta: i32) -> Result<()> {
            Err(Error::Store("connection refused".into()))
        }

        async fn push_failed(&self, _counter_id: CounterId, _entry: FailedSend) -> Result<()> {
            Err(Error::Store("connection refused".into()))
        }

        async fn sum_sent_for_account(
            &self,
            _account_id: &AccountId,
            _day: NaiveDate,
        ) -> Result<i32> {
            Err(Error::Store("connection refused".into()))
        }

        async fn counters_for_account(
            &self,
            _account_id: &AccountId,
            _day: NaiveDate,
        ) -> Result<Vec<QuotaCounter>> {
            Err(Error::Store("connection refused".into()))
        }

        async fn reset_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
            Err(Error::Store("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_error_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore), 100);
        let decision = limiter
            .can_send(Uuid::new_v4(), &"5511990001".to_string(), 10)
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("connection refused"));
    }
}
