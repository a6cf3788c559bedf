//! Scheduler for cron-based digest runs
//!
//! Manages the daily digest schedule with support for:
//! - Cron expression parsing
//! - Timezone-aware scheduling
//! - Sleep/wake detection via time-jump polling
//! - Missed job handling (runs if within grace period)
//! - Delivery record rollover at local midnight

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;

use crate::error::ExecutionError;
use crate::state::AppState;
use crate::types::{Config, ExecutionTrigger, ScheduleEntry};

/// Grace period for missed jobs (2 hours)
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

/// Message sent to trigger a digest run
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: ExecutionTrigger,
    pub scheduled_for: DateTime<Utc>,
}

/// Scheduler for the daily digest
pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Start the scheduler loop
    ///
    /// This runs indefinitely, checking for due jobs every minute.
    /// It also handles sleep/wake detection.
    pub async fn run(&self) {
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

            let now = Utc::now();
            self.roll_over_delivery(now).await;

            // Detect sleep: time jumped more than 5 minutes
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for missed jobs",
                    time_jump
                );
                self.check_missed_jobs(now).await;
            }

            self.check_and_run_due_jobs(now).await;

            last_check = now;
        }
    }

    /// Clear the delivery record once the user's local day has changed.
    pub(crate) async fn roll_over_delivery(&self, now: DateTime<Utc>) {
        let timezone = self.state.config.read().timezone.clone();
        let Ok(tz) = parse_tz(&timezone) else {
            return;
        };
        let today = local_today(now, tz);
        if self.state.delivery.roll_over(today).await {
            log::info!("New local day {}, delivery record cleared", today);
        }
    }

    /// The enabled schedule and the timezone it runs in.
    fn active_schedule(&self) -> Option<(ScheduleEntry, Tz)> {
        let config = self.state.config.read();
        if !config.schedule.enabled {
            return None;
        }
        match schedule_timezone(&config) {
            Ok(tz) => Some((config.schedule.clone(), tz)),
            Err(e) => {
                log::warn!("Schedule check failed: {}", e);
                None
            }
        }
    }

    /// Check whether the digest should run now
    async fn check_and_run_due_jobs(&self, now: DateTime<Utc>) {
        let Some((entry, tz)) = self.active_schedule() else {
            return;
        };

        match due_run(&entry, tz, self.state.get_last_scheduled_run(), now) {
            Ok(Some(scheduled)) => {
                self.trigger(ExecutionTrigger::Scheduled, scheduled).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Schedule check failed: {}", e),
        }
    }

    /// Check for a run that was missed during sleep
    async fn check_missed_jobs(&self, now: DateTime<Utc>) {
        let Some((entry, tz)) = self.active_schedule() else {
            return;
        };

        if let Ok(Some(scheduled)) = missed_run(&entry, tz, self.state.get_last_scheduled_run(), now) {
            log::info!("Found missed digest run scheduled for {}, running now", scheduled);
            self.trigger(ExecutionTrigger::Missed, scheduled).await;
        }
    }

    async fn trigger(&self, trigger: ExecutionTrigger, scheduled_for: DateTime<Utc>) {
        // Mark before sending so the next poll does not fire the same slot
        self.state.set_last_scheduled_run(scheduled_for);
        if self
            .sender
            .send(SchedulerMessage {
                trigger,
                scheduled_for,
            })
            .await
            .is_err()
        {
            log::error!("Failed to send scheduler message for {:?} run", trigger);
        }
    }
}

/// The scheduled time matching `now`, if it is within two minutes and has
/// not already run.
pub fn due_run(
    entry: &ScheduleEntry,
    tz: Tz,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;

    let now_local = now.with_timezone(&tz);
    let Some(next_time) = schedule.after(&(now_local - chrono::Duration::minutes(2))).next() else {
        return Ok(None);
    };

    let next_utc = next_time.with_timezone(&Utc);
    let diff = (now - next_utc).num_seconds().abs();
    if diff >= 120 {
        return Ok(None);
    }
    if let Some(last) = last_run {
        if (last - next_utc).num_seconds().abs() < 60 {
            return Ok(None); // Already ran
        }
    }
    Ok(Some(next_utc))
}

/// The earliest scheduled time inside the grace period that has not run.
pub fn missed_run(
    entry: &ScheduleEntry,
    tz: Tz,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;

    let grace_start = now.with_timezone(&tz) - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);

    for scheduled in schedule.after(&grace_start) {
        let scheduled_utc = scheduled.with_timezone(&Utc);
        if scheduled_utc > now {
            break;
        }
        if matches!(last_run, Some(last) if last >= scheduled_utc) {
            continue; // Already ran
        }
        return Ok(Some(scheduled_utc));
    }

    Ok(None)
}

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ExecutionError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    // Add "0" for seconds at the start
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        ExecutionError::ConfigurationError(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

fn parse_tz(timezone: &str) -> Result<Tz, ExecutionError> {
    timezone
        .parse()
        .map_err(|_| ExecutionError::ConfigurationError(format!("Invalid timezone: {}", timezone)))
}

/// Timezone for cron evaluation: the schedule's own, else the user's.
pub fn schedule_timezone(config: &Config) -> Result<Tz, ExecutionError> {
    parse_tz(config.schedule_timezone())
}

/// Calendar date at `now` in the user's timezone.
pub fn local_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Get the next scheduled time for the digest
pub fn get_next_run_time(entry: &ScheduleEntry, tz: Tz) -> Result<DateTime<Utc>, ExecutionError> {
    let schedule = parse_cron(&entry.cron)?;

    let next = schedule.upcoming(tz).next().ok_or_else(|| {
        ExecutionError::ConfigurationError("No upcoming scheduled time".to_string())
    })?;

    Ok(next.with_timezone(&Utc))
}
