//! Quota store seam and the in-memory implementation

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use sendrust_common::types::{AccountId, CampaignId, CounterId, FailedSend, QuotaCounter};
use sendrust_common::{Error, Result};

/// Keyed counter service holding the daily (campaign, account, day) tallies
/// and the rolling failure queue.
///
/// `get_or_create` is idempotent per key. Increments happen only after a real
/// delivery attempt; the rate limiter never mutates on a denied check.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Today's counter for the triple, created lazily on first access.
    async fn get_or_create(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        day: NaiveDate,
    ) -> Result<QuotaCounter>;

    /// Add `delta` to a counter's sent tally.
    async fn increment_sent(&self, counter_id: CounterId, delta: i32) -> Result<()>;

    /// Add `delta` to a counter's failed tally.
    async fn increment_failed(&self, counter_id: CounterId, delta: i32) -> Result<()>;

    /// Append a retryable entry to a counter's failure queue.
    async fn push_failed(&self, counter_id: CounterId, entry: FailedSend) -> Result<()>;

    /// Sum of `sent_count` across all campaigns sharing the account for `day`.
    async fn sum_sent_for_account(&self, account_id: &AccountId, day: NaiveDate) -> Result<i32>;

    /// All of the account's counters for `day`, for reporting.
    async fn counters_for_account(
        &self,
        account_id: &AccountId,
        day: NaiveDate,
    ) -> Result<Vec<QuotaCounter>>;

    /// Bulk-expire counters past their retention window. Returns how many
    /// were purged. Counters merely past `reset_at` are kept until retention
    /// runs out so the failure queue stays available for next-day retries.
    async fn reset_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// HashMap-backed quota store.
///
/// Individual operations serialize behind an async `RwLock`; the
/// check-then-increment sequence across operations is deliberately not a
/// transaction (see the limiter's per-target re-check).
pub struct MemoryQuotaStore {
    counters: Arc<RwLock<HashMap<(CampaignId, AccountId, NaiveDate), QuotaCounter>>>,
    retention_days: i64,
}

impl MemoryQuotaStore {
    pub fn new(retention_days: i64) -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            retention_days,
        }
    }

    async fn mutate_by_id<F>(&self, counter_id: CounterId, f: F) -> Result<()>
    where
        F: FnOnce(&mut QuotaCounter),
    {
        let mut counters = self.counters.write().await;
        let counter = counters
            .values_mut()
            .find(|c| c.id == counter_id)
            .ok_or_else(|| Error::Store(format!("Unknown counter: {}", counter_id)))?;
        f(counter);
        counter.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for MemoryQuotaStore {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get_or_create(
        &self,
        campaign_id: CampaignId,
        account_id: &AccountId,
        day: NaiveDate,
    ) -> Result<QuotaCounter> {
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry((campaign_id, account_id.clone(), day))
            .or_insert_with(|| {
                debug!(%campaign_id, %account_id, %day, "Creating quota counter");
                QuotaCounter::new(campaign_id, account_id.clone(), day)
            });
        Ok(counter.clone())
    }

    async fn increment_sent(&self, counter_id: CounterId, delta: i32) -> Result<()> {
        self.mutate_by_id(counter_id, |c| c.sent_count += delta).await
    }

    async fn increment_failed(&self, counter_id: CounterId, delta: i32) -> Result<()> {
        self.mutate_by_id(counter_id, |c| c.failed_count += delta).await
    }

    async fn push_failed(&self, counter_id: CounterId, entry: FailedSend) -> Result<()> {
        self.mutate_by_id(counter_id, |c| c.failed_queue.push(entry))
            .await
    }

    async fn sum_sent_for_account(&self, account_id: &AccountId, day: NaiveDate) -> Result<i32> {
        let counters = self.counters.read().await;
        Ok(counters
            .values()
            .filter(|c| &c.account_id == account_id && c.day == day)
            .map(|c| c.sent_count)
            .sum())
    }

    async fn counters_for_account(
        &self,
        account_id: &AccountId,
        day: NaiveDate,
    ) -> Result<Vec<QuotaCounter>> {
        let counters = self.counters.read().await;
        Ok(counters
            .values()
            .filter(|c| &c.account_id == account_id && c.day == day)
            .cloned()
            .collect())
    }

    async fn reset_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now.date_naive() - Duration::days(self.retention_days);
        let mut counters = self.counters.write().await;
        let before = counters.len();
        counters.retain(|_, c| c.day >= cutoff);
        let purged = (before - counters.len()) as u64;
        if purged > 0 {
            debug!(purged, %cutoff, "Purged quota counters past retention");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryQuotaStore::default();
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();

        let first = store
            .get_or_create(campaign, &account, day(2026, 3, 14))
            .await
            .unwrap();
        let second = store
            .get_or_create(campaign, &account, day(2026, 3, 14))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.sent_count, 0);
    }

    #[tokio::test]
    async fn test_increment_and_failure_queue() {
        let store = MemoryQuotaStore::default();
        let campaign = Uuid::new_v4();
        let account = "5511990001".to_string();
        let counter = store
            .get_or_create(campaign, &account, day(2026, 3, 14))
            .await
            .unwrap();

        store.increment_sent(counter.id, 1).await.unwrap();
        store.increment_sent(counter.id, 1).await.unwrap();
        store.increment_failed(counter.id, 1).await.unwrap();
        store
            .push_failed(
                counter.id,
                FailedSend {
                    recipient_id: "r1".into(),
                    message: "hello".into(),
                    failed_at: Utc::now(),
                    reason: "channel timeout".into(),
                    retry_count: 0,
                },
            )
            .await
            .unwrap();

        let reread = store
            .get_or_create(campaign, &account, day(2026, 3, 14))
            .await
            .unwrap();
        assert_eq!(reread.sent_count, 2);
        assert_eq!(reread.failed_count, 1);
        assert_eq!(reread.failed_queue.len(), 1);
        assert_eq!(reread.failed_queue[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_counter_errors() {
        let store = MemoryQuotaStore::default();
        let err = store.increment_sent(Uuid::new_v4(), 1).await.unwrap_err();
        assert!(err.to_string().contains("Unknown counter"));
    }

    #[tokio::test]
    async fn test_sum_across_campaigns_same_account() {
        let store = MemoryQuotaStore::default();
        let account = "5511990001".to_string();
        let d = day(2026, 3, 14);

        for sent in [3, 4] {
            let counter = store
                .get_or_create(Uuid::new_v4(), &account, d)
                .await
                .unwrap();
            store.increment_sent(counter.id, sent).await.unwrap();
        }
        // Different account, same day, should not count
        let other = store
            .get_or_create(Uuid::new_v4(), &"5511990002".to_string(), d)
            .await
            .unwrap();
        store.increment_sent(other.id, 10).await.unwrap();

        assert_eq!(store.sum_sent_for_account(&account, d).await.unwrap(), 7);
        assert_eq!(
            store.counters_for_account(&account, d).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_reset_expired_purges_past_retention() {
        let store = MemoryQuotaStore::new(7);
        let account = "5511990001".to_string();
        store
            .get_or_create(Uuid::new_v4(), &account, day(2026, 3, 1))
            .await
            .unwrap();
        store
            .get_or_create(Uuid::new_v4(), &account, day(2026, 3, 13))
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 14, 0, 5, 0).unwrap();
        let purged = store.reset_expired(now).await.unwrap();

        assert_eq!(purged, 1);
        // Yesterday's counter survives for next-day retry access
        assert_eq!(
            store
                .counters_for_account(&account, day(2026, 3, 13))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
