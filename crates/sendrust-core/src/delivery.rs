//! Outbound delivery seam

use async_trait::async_trait;
use sendrust_common::types::AccountId;
use sendrust_common::Result;

/// Result of a single delivery attempt
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    /// Accepted by the channel
    Sent { message_id: String },
    /// Rejected or errored; the executor books it into the failure queue
    Failed { error: String },
}

impl DeliveryResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryResult::Sent { .. })
    }
}

/// Sends one message to one recipient from one sending account.
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    async fn deliver(
        &self,
        recipient_id: &str,
        account_id: &AccountId,
        message: &str,
    ) -> DeliveryResult;
}

/// Supplies the default set of sending accounts for a manual run that
/// names none.
#[async_trait]
pub trait AccountSelector: Send + Sync {
    async fn select_accounts(&self) -> Result<Vec<AccountId>>;
}
