//! Contact selection seam

use async_trait::async_trait;
use sendrust_common::types::Target;
use sendrust_common::Result;

/// Returns a ranked, filtered list of recipients for a campaign.
///
/// The filter criteria are opaque to the core; they come straight off the
/// campaign definition and are interpreted by the implementation.
#[async_trait]
pub trait ContactSelector: Send + Sync {
    /// At most `limit` targets matching `filter`.
    async fn select_targets(&self, filter: &serde_json::Value, limit: usize)
        -> Result<Vec<Target>>;
}
