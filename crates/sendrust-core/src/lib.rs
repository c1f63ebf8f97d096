//! SendRust Core - Campaign scheduling and rate-limited execution
//!
//! This crate provides the bulk-messaging pipeline for SendRust: a
//! recurring-trigger scheduler, a two-tier quota enforcer (per-campaign and
//! per-sending-account), an adaptive inter-message delayer, and the executor
//! that orchestrates target selection, quota checks, delivery, and failure
//! bookkeeping.
//!
//! The persistent store, the delivery channel, contact selection, and account
//! selection are collaborator traits the host process implements; this crate
//! ships an in-memory quota store and a tokio-backed trigger engine.

pub mod delay;
pub mod delivery;
pub mod executor;
pub mod limiter;
pub mod logging;
pub mod quota;
pub mod repository;
pub mod scheduler;
pub mod targeting;
pub mod trigger;

pub use delay::MessageDelayer;
pub use delivery::{AccountSelector, DeliveryResult, MessageDelivery};
pub use executor::{
    CampaignExecutor, ExecutionRecord, ExecutionStatus, ExecutionSummary, TargetOutcome,
    TargetStatus,
};
pub use limiter::{AccountStats, QuotaDecision, RateLimiter, RemainingQuota};
pub use logging::init_logging;
pub use quota::{MemoryQuotaStore, QuotaStore};
pub use repository::CampaignRepository;
pub use scheduler::{CampaignScheduler, RunOutcome, SchedulerStatus};
pub use targeting::ContactSelector;
pub use trigger::{TokioTriggerEngine, TriggerEngine, TriggerHandle};
