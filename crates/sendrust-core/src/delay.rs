//! Message Delayer - adaptive inter-message pacing
//!
//! Keeps outbound traffic looking humane: randomized base delays, a long
//! cooldown after every burst of consecutive sends, retry backoff, and
//! deferral outside the configured working-hours window.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use rand::Rng;
use tracing::{debug, warn};

use sendrust_common::config::DelayConfig;

/// Computes the wait before the next send.
///
/// Precedence: retry backoff, then burst cooldown, then working-hours
/// deferral, then the randomized base delay. Timezone or window parse
/// failures degrade to "always within working hours" so pacing never blocks
/// forever.
pub struct MessageDelayer {
    config: DelayConfig,
    timezone: Option<Tz>,
    window: Option<(NaiveTime, NaiveTime)>,
    send_counter: AtomicU32,
}

impl MessageDelayer {
    pub fn new(config: DelayConfig) -> Self {
        let timezone = match config.timezone.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!(
                    timezone = %config.timezone,
                    "Unknown timezone, working-hours gating disabled"
                );
                None
            }
        };

        let window = if config.working_hours.enabled {
            match (
                NaiveTime::parse_from_str(&config.working_hours.start, "%H:%M"),
                NaiveTime::parse_from_str(&config.working_hours.end, "%H:%M"),
            ) {
                (Ok(start), Ok(end)) if start < end => Some((start, end)),
                _ => {
                    warn!(
                        start = %config.working_hours.start,
                        end = %config.working_hours.end,
                        "Invalid working-hours window, gating disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            timezone,
            window,
            send_counter: AtomicU32::new(0),
        }
    }

    /// Wait time before the next send. `retry_count > 0` selects the fixed
    /// backoff schedule and bypasses both burst and working-hours gating.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        if retry_count > 0 {
            let idx = (retry_count as usize - 1).min(self.config.retry_backoff_ms.len().saturating_sub(1));
            if let Some(&ms) = self.config.retry_backoff_ms.get(idx) {
                debug!(retry_count, delay_ms = ms, "Retry backoff delay");
                return Duration::from_millis(ms);
            }
            // Empty backoff table, fall through to the base delay
        }

        let sends = self.send_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.burst_threshold > 0 && sends % self.config.burst_threshold == 0 {
            debug!(sends, delay_ms = self.config.burst_cooldown_ms, "Burst cooldown");
            return Duration::from_millis(self.config.burst_cooldown_ms);
        }

        if let Some(deferral) = self.working_hours_deferral() {
            debug!(delay_ms = deferral.as_millis() as u64, "Outside working hours, deferring");
            return deferral;
        }

        self.base_delay()
    }

    /// Zero the burst counter at the start of a new execution.
    pub fn reset_batch_counter(&self) {
        self.send_counter.store(0, Ordering::Relaxed);
    }

    /// Cooperative suspension; never blocks other executions.
    pub async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn base_delay(&self) -> Duration {
        let (min, max) = (
            self.config.base_min_ms.min(self.config.base_max_ms),
            self.config.base_min_ms.max(self.config.base_max_ms),
        );
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn working_hours_deferral(&self) -> Option<Duration> {
        let (tz, (start, end)) = (self.timezone?, self.window?);
        let local_time = Utc::now().with_timezone(&tz).time();
        deferral_until_open(local_time, start, end)
    }
}

/// Exact distance from `now` to the next window opening, or `None` when the
/// window is currently open. Before opening defers to today's start; at or
/// after closing defers to tomorrow's start.
fn deferral_until_open(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> Option<Duration> {
    if now >= start && now < end {
        return None;
    }
    let millis = if now < start {
        (start - now).num_milliseconds()
    } else {
        let until_midnight =
            chrono::Duration::hours(24) - chrono::Duration::seconds(now.num_seconds_from_midnight() as i64);
        (until_midnight + (start - NaiveTime::MIN)).num_milliseconds()
    };
    Some(Duration::from_millis(millis.max(0) as u64))
}
