//! Common types for SendRust

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for executions
pub type ExecutionId = Uuid;

/// Unique identifier for quota counters
pub type CounterId = Uuid;

/// Channel identity a message is dispatched from (e.g. a phone number).
/// Subject to its own platform-wide daily cap independent of any campaign.
pub type AccountId = String;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(crate::Error::Validation(format!(
                "Unknown campaign status: {}",
                other
            ))),
        }
    }
}

/// What happens to a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry from the day's failure queue on the next day
    #[default]
    NextDay,
    /// Retry in-loop, paced by the backoff schedule
    Immediate,
    /// Record the failure and move on
    Never,
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::NextDay => write!(f, "next_day"),
            RetryPolicy::Immediate => write!(f, "immediate"),
            RetryPolicy::Never => write!(f, "never"),
        }
    }
}

impl std::str::FromStr for RetryPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next_day" => Ok(RetryPolicy::NextDay),
            "immediate" => Ok(RetryPolicy::Immediate),
            "never" => Ok(RetryPolicy::Never),
            other => Err(crate::Error::Validation(format!(
                "Unknown retry policy: {}",
                other
            ))),
        }
    }
}

/// Recurring trigger settings for a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSchedule {
    /// Whether the campaign may be triggered at all
    #[serde(default)]
    pub enabled: bool,

    /// Daily send time, "HH:MM"
    #[serde(default = "default_send_time")]
    pub send_time: String,

    /// IANA timezone name the send time is interpreted in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Raw 5-field trigger expression; overrides `send_time` when set
    pub cron_expression: Option<String>,
}

impl Default for CampaignSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            send_time: default_send_time(),
            timezone: default_timezone(),
            cron_expression: None,
        }
    }
}

fn default_send_time() -> String {
    "09:00".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Running statistics for a campaign
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CampaignStats {
    pub sent_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A reusable bulk-send configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,

    /// Message template with placeholder slots; rendered downstream,
    /// opaque to the scheduling core.
    pub message_template: String,

    /// Target-filter criteria, passed through to contact selection untouched.
    #[serde(default)]
    pub target_filter: serde_json::Value,

    /// Campaign-level daily cap
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i32,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    pub status: CampaignStatus,

    #[serde(default)]
    pub schedule: CampaignSchedule,

    #[serde(default)]
    pub stats: CampaignStats,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_daily_limit() -> i32 {
    10
}

impl Campaign {
    /// Whether the campaign is eligible for trigger-driven execution.
    /// Run-now bypasses this gate.
    pub fn can_trigger(&self) -> bool {
        self.status == CampaignStatus::Active && self.schedule.enabled
    }

    /// Daily limit clamped to the channel's hard ceiling.
    pub fn effective_daily_limit(&self, hard_ceiling: i32) -> i32 {
        self.daily_limit.clamp(0, hard_ceiling)
    }
}

/// One recipient selected for delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub recipient_id: String,
    pub display_name: String,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A retryable entry in a day's failure queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSend {
    pub recipient_id: String,
    pub message: String,
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    pub retry_count: u32,
}

/// Per (campaign, account, day) tally of sent/failed counts and the retry queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub id: CounterId,
    pub campaign_id: CampaignId,
    pub account_id: AccountId,
    pub day: NaiveDate,
    pub sent_count: i32,
    pub failed_count: i32,
    pub failed_queue: Vec<FailedSend>,

    /// Midnight UTC of the following day
    pub reset_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaCounter {
    /// Create a fresh counter for a (campaign, account, day) triple.
    pub fn new(campaign_id: CampaignId, account_id: AccountId, day: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            account_id,
            day,
            sent_count: 0,
            failed_count: 0,
            failed_queue: Vec::new(),
            reset_at: reset_at_for(day),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the counter's day is over.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Midnight UTC of the day after `day`.
pub fn reset_at_for(day: NaiveDate) -> DateTime<Utc> {
    let next = day + Duration::days(1);
    DateTime::from_naive_utc_and_offset(next.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
}
