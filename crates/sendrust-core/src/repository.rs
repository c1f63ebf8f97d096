//! Campaign repository seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sendrust_common::types::{Campaign, CampaignId};
use sendrust_common::Result;

/// Access to persisted campaign definitions.
///
/// The store behind this trait is outside the core; implementations are
/// expected to be cheap to clone and safe to share.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Look up a single campaign.
    async fn find(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// All campaigns in `active` status.
    async fn list_active(&self) -> Result<Vec<Campaign>>;

    /// Fold one execution's tallies into the campaign's running statistics.
    async fn record_run(
        &self,
        id: CampaignId,
        sent: i32,
        failed: i32,
        skipped: i32,
        finished_at: DateTime<Utc>,
    ) -> Result<()>;
}
