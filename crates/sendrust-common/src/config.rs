//! Configuration for SendRust

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Quota enforcement configuration
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Inter-message pacing configuration
    #[serde(default)]
    pub delay: DelayConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Quota enforcement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Platform-wide daily cap per sending account, across all campaigns
    #[serde(default = "default_account_daily_cap")]
    pub account_daily_cap: i32,

    /// Hard ceiling a campaign's own daily limit is clamped to
    #[serde(default = "default_campaign_hard_ceiling")]
    pub campaign_hard_ceiling: i32,

    /// Days an expired counter is retained before it is purged
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            account_daily_cap: default_account_daily_cap(),
            campaign_hard_ceiling: default_campaign_hard_ceiling(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_account_daily_cap() -> i32 {
    100
}

fn default_campaign_hard_ceiling() -> i32 {
    45
}

fn default_retention_days() -> i64 {
    7
}

/// Inter-message pacing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Lower bound of the randomized base delay, milliseconds
    #[serde(default = "default_base_min_ms")]
    pub base_min_ms: u64,

    /// Upper bound of the randomized base delay, milliseconds
    #[serde(default = "default_base_max_ms")]
    pub base_max_ms: u64,

    /// A long cooldown is inserted after every N consecutive sends
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: u32,

    /// Burst cooldown duration, milliseconds
    #[serde(default = "default_burst_cooldown_ms")]
    pub burst_cooldown_ms: u64,

    /// Fixed backoff schedule indexed by retry attempt, milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: Vec<u64>,

    /// Working-hours window; sends outside it are deferred
    #[serde(default)]
    pub working_hours: WorkingHoursConfig,

    /// IANA timezone the working-hours window is evaluated in
    #[serde(default = "default_delay_timezone")]
    pub timezone: String,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            base_min_ms: default_base_min_ms(),
            base_max_ms: default_base_max_ms(),
            burst_threshold: default_burst_threshold(),
            burst_cooldown_ms: default_burst_cooldown_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            working_hours: WorkingHoursConfig::default(),
            timezone: default_delay_timezone(),
        }
    }
}

fn default_base_min_ms() -> u64 {
    3_000
}

fn default_base_max_ms() -> u64 {
    5_000
}

fn default_burst_threshold() -> u32 {
    5
}

fn default_burst_cooldown_ms() -> u64 {
    60_000
}

fn default_retry_backoff_ms() -> Vec<u64> {
    vec![3_000, 5_000, 10_000]
}

fn default_delay_timezone() -> String {
    "UTC".to_string()
}

/// Working-hours window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursConfig {
    /// Whether working-hours gating is applied at all
    #[serde(default = "default_working_hours_enabled")]
    pub enabled: bool,

    /// Window opening time, "HH:MM"
    #[serde(default = "default_working_hours_start")]
    pub start: String,

    /// Window closing time, "HH:MM"
    #[serde(default = "default_working_hours_end")]
    pub end: String,
}

impl Default for WorkingHoursConfig {
    fn default() -> Self {
        Self {
            enabled: default_working_hours_enabled(),
            start: default_working_hours_start(),
            end: default_working_hours_end(),
        }
    }
}

fn default_working_hours_enabled() -> bool {
    true
}

fn default_working_hours_start() -> String {
    "08:00".to_string()
}

fn default_working_hours_end() -> String {
    "18:00".to_string()
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time of day the system-wide counter reset fires, "HH:MM" UTC
    #[serde(default = "default_reset_time")]
    pub daily_reset_time: String,

    /// Timezone campaign triggers default to when a campaign names none
    #[serde(default = "default_scheduler_timezone")]
    pub default_timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_reset_time: default_reset_time(),
            default_timezone: default_scheduler_timezone(),
        }
    }
}

fn default_reset_time() -> String {
    "00:00".to_string()
}

fn default_scheduler_timezone() -> String {
    "UTC".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./sendrust.toml"),
            std::path::PathBuf::from("/etc/sendrust/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                tracing::info!(path = %path.display(), "Loading configuration");
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
