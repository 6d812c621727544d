use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;
use crate::runner::{RunError, WindowedRunner};
use crate::runs::TriggerKind;

/// When periodic runs fire. Daily times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Interval(Duration),
    Daily { hour: u32, minute: u32 },
}

impl Schedule {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        match config.hour {
            Some(hour) => Schedule::Daily {
                hour,
                minute: config.minute.unwrap_or(0),
            },
            None => Schedule::Interval(Duration::minutes(i64::from(config.interval_minutes))),
        }
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Interval(every) => after + every,
            Schedule::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
                let today = after.date_naive().and_time(time).and_utc();
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub schedule: Schedule,
    pub misfire_grace: Duration,
}

impl SchedulerConfig {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            schedule: Schedule::from_config(config),
            misfire_grace: Duration::seconds(config.misfire_grace_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringPlan {
    /// Trigger time to run with, if the latest due firing is still inside the grace period.
    pub fire_at: Option<DateTime<Utc>>,
    /// Due firings folded into this one (or skipped along with it).
    pub coalesced: usize,
    pub next: DateTime<Utc>,
}

/// Collapses every firing due by `now` into the latest one. That firing keeps its
/// own trigger time when it is at most `grace` late and is skipped otherwise.
pub fn plan_firing(
    schedule: &Schedule,
    due: DateTime<Utc>,
    now: DateTime<Utc>,
    grace: Duration,
) -> FiringPlan {
    let mut latest = due;
    let mut coalesced = 0;
    loop {
        let candidate = schedule.next_after(latest);
        if candidate > now {
            break;
        }
        latest = candidate;
        coalesced += 1;
    }

    FiringPlan {
        fire_at: (now - latest <= grace).then_some(latest),
        coalesced,
        next: schedule.next_after(latest),
    }
}

pub async fn run_scheduler(
    runner: Arc<WindowedRunner>,
    config: SchedulerConfig,
    next_fire: watch::Sender<Option<DateTime<Utc>>>,
    shutdown: CancellationToken,
) {
    let mut due = config.schedule.next_after(Utc::now());
    info!(next = %due, schedule = ?config.schedule, "scheduler started");

    loop {
        next_fire.send_replace(Some(due));
        let wait = (due - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(wait) => {}
        }

        let plan = plan_firing(&config.schedule, due, Utc::now(), config.misfire_grace);
        if plan.coalesced > 0 {
            info!(coalesced = plan.coalesced, "coalesced overdue firings");
        }

        match plan.fire_at {
            Some(fire_at) => match runner.trigger(TriggerKind::Scheduled, fire_at).await {
                Ok(_) => {}
                Err(RunError::Overlap) => {
                    info!(%fire_at, "run already in progress, firing coalesced");
                }
                Err(err) => error!(error = %err, %fire_at, "scheduled run failed"),
            },
            None => warn!(
                due = %due,
                grace_secs = config.misfire_grace.num_seconds(),
                "missed firing outside grace period, skipping"
            ),
        }

        // A long run may have pushed past further firings; they are folded on the next pass.
        due = plan.next;
    }

    next_fire.send_replace(None);
    info!("scheduler stopped");
}
