//! Trigger engine seam and the tokio-backed default implementation
//!
//! A trigger turns a 5-field cron expression ("MIN HOUR DOM MON DOW",
//! wildcards `*`, `*/N`, comma lists) into a recurring invocation. All five
//! fields must match a firing instant; day-of-week uses 0 = Sunday.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use sendrust_common::{Error, Result};

/// Work to run on each firing.
pub type TriggerCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A live recurring invocation. Stopping (or dropping) the handle tears the
/// trigger down; a handle must be torn down before a replacement is
/// registered to avoid duplicate firings.
#[derive(Debug)]
pub struct TriggerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl TriggerHandle {
    #[cfg(test)]
    pub(crate) fn from_task(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Schedules a callback on a recurring trigger expression.
pub trait TriggerEngine: Send + Sync {
    /// Register `callback` to fire per `expression`, evaluated in `timezone`.
    /// Rejects expressions that never fire.
    fn schedule(
        &self,
        expression: &str,
        timezone: &str,
        callback: TriggerCallback,
    ) -> Result<TriggerHandle>;
}

/// Default engine: one spawned task per trigger, sleeping until the next
/// computed firing.
pub struct TokioTriggerEngine;

impl TriggerEngine for TokioTriggerEngine {
    fn schedule(
        &self,
        expression: &str,
        timezone: &str,
        callback: TriggerCallback,
    ) -> Result<TriggerHandle> {
        let tz = parse_timezone(timezone);

        // Reject expressions that can never produce a firing.
        if next_fire(expression, tz, Utc::now()).is_none() {
            return Err(Error::Schedule(format!(
                "Invalid trigger expression: '{}'",
                expression
            )));
        }

        let expression = expression.to_string();
        let task = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = next_fire(&expression, tz, now) else {
                    warn!(%expression, "Trigger expression stopped producing firings");
                    break;
                };
                let sleep_for = (next - now).to_std().unwrap_or_default();
                debug!(%expression, %next, "Trigger armed");
                tokio::time::sleep(sleep_for).await;
                callback().await;
            }
        });

        Ok(TriggerHandle { task })
    }
}

/// Resolve an IANA timezone name, falling back to UTC.
pub fn parse_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "Unknown timezone, falling back to UTC");
            chrono_tz::UTC
        }
    }
}

/// Next firing of `expression` strictly after `after`, evaluated in `tz`.
/// Expressions whose date fields can never match (e.g. February 30th)
/// exhaust the scan bound and yield `None`.
pub fn next_fire(expression: &str, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }

    let minutes = parse_field(parts[0], 0, 59)?;
    let hours = parse_field(parts[1], 0, 23)?;
    let days = parse_field(parts[2], 1, 31)?;
    let months = parse_field(parts[3], 1, 12)?;
    let weekdays = parse_field(parts[4], 0, 6)?;

    let mut candidate = (after + Duration::minutes(1)).with_timezone(&tz);
    candidate = candidate.with_second(0).unwrap_or(candidate);
    candidate = candidate.with_nanosecond(0).unwrap_or(candidate);

    // Scan a leap cycle's worth of days so patterns like Feb 29 still resolve.
    for _ in 0..(4 * 366) {
        let date_matches = days.contains(&candidate.day())
            && months.contains(&candidate.month())
            && weekdays.contains(&candidate.weekday().num_days_from_sunday());

        if date_matches {
            // Walk the rest of this local day minute by minute.
            let date = candidate.date_naive();
            while candidate.date_naive() == date {
                if minutes.contains(&candidate.minute()) && hours.contains(&candidate.hour()) {
                    return Some(candidate.with_timezone(&Utc));
                }
                candidate += Duration::minutes(1);
            }
        } else {
            let next_day = candidate.date_naive() + Duration::days(1);
            candidate = next_day
                .and_hms_opt(0, 0, 0)
                .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
                .unwrap_or(candidate + Duration::days(1));
        }
    }

    None
}

/// Parse one cron field into its matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    if field.contains(',') {
        let vals: std::result::Result<Vec<u32>, _> =
            field.split(',').map(|s| s.trim().parse()).collect();
        return vals
            .ok()
            .filter(|v| v.iter().all(|x| *x >= min && *x <= max));
    }

    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}

/// Build a once-daily expression from an "HH:MM" send time.
pub fn daily_expression(send_time: &str) -> Result<String> {
    let (hour, minute) = send_time
        .split_once(':')
        .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
        .ok_or_else(|| Error::Schedule(format!("Invalid send time: '{}'", send_time)))?;
    if hour > 23 || minute > 59 {
        return Err(Error::Schedule(format!("Invalid send time: '{}'", send_time)));
    }
    Ok(format!("{} {} * * *", minute, hour))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_next_fire_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_rolls_to_next_day() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 9, 30, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_respects_timezone() {
        // 08:00 in São Paulo (UTC-3) is 11:00 UTC
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::America::Sao_Paulo, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_fire("*/15 * * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_next_fire_honors_day_of_week() {
        // Monday 2026-02-23: a Sundays-at-08:00 expression must wait for
        // 2026-03-01, not fire the same morning
        let after = Utc.with_ymd_and_hms(2026, 2, 23, 7, 0, 0).unwrap();
        let next = next_fire("0 8 * * 0", chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_honors_day_of_month_and_month() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();

        let next = next_fire("30 9 1 * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap());

        let next = next_fire("0 12 25 12 *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 12, 25, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_next_fire_impossible_date() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        assert!(next_fire("0 0 30 2 *", chrono_tz::UTC, after).is_none());
    }

    #[test]
    fn test_invalid_expressions() {
        let after = Utc::now();
        assert!(next_fire("bad", chrono_tz::UTC, after).is_none());
        assert!(next_fire("61 8 * * *", chrono_tz::UTC, after).is_none());
        assert!(next_fire("0 25 * * *", chrono_tz::UTC, after).is_none());
        assert!(next_fire("0 8 32 * *", chrono_tz::UTC, after).is_none());
        assert!(next_fire("0 8 * 13 *", chrono_tz::UTC, after).is_none());
        assert!(next_fire("0 8 * * 7", chrono_tz::UTC, after).is_none());
        assert!(next_fire("*/0 * * * *", chrono_tz::UTC, after).is_none());
    }

    #[test]
    fn test_daily_expression() {
        assert_eq!(daily_expression("09:30").unwrap(), "30 9 * * *");
        assert_eq!(daily_expression("00:00").unwrap(), "0 0 * * *");
        assert!(daily_expression("25:00").is_err());
        assert!(daily_expression("nine").is_err());
    }

    #[test]
    fn test_schedule_rejects_invalid_expression() {
        // Validation happens before anything is spawned
        let engine = TokioTriggerEngine;
        let err = engine
            .schedule("not cron", "UTC", Arc::new(|| Box::pin(async {})))
            .unwrap_err();
        assert!(matches!(err, Error::Schedule(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fires_and_stops() {
        let fired = Arc::new(AtomicU32::new(0));
        let engine = TokioTriggerEngine;
        let counter = fired.clone();
        let handle = engine
            .schedule(
                "* * * * *",
                "UTC",
                Arc::new(move || {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(180)).await;
        assert!(fired.load(Ordering::SeqCst) >= 1);

        handle.stop();
        let settled = fired.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), settled);
    }
}
