use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Execution state of a scheduled job.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Idle between executions (the timer may or may not be armed).
    #[default]
    Stopped,
    /// The job body is executing right now.
    Running,
    /// The last execution failed inside the job machinery.
    Error,
}

/// Runtime state for a job, as exposed to observers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Job identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Cron expression as registered.
    pub schedule: String,
    /// Whether the job's timer is armed.
    pub enabled: bool,
    /// Execution state.
    pub status: JobState,
    /// Completed executions (success or failure).
    pub run_count: u64,
    /// Failed executions since the last restart.
    pub error_count: u64,
    /// When the last execution completed.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled fire time, `None` while stopped.
    pub next_run: Option<DateTime<Utc>>,
    /// Error from the last failed execution.
    pub last_error: Option<String>,
}

impl JobStatus {
    /// Fresh status record for a newly registered job.
    pub fn new(id: impl Into<String>, name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule: schedule.into(),
            enabled: false,
            status: JobState::Stopped,
            run_count: 0,
            error_count: 0,
            last_run: None,
            next_run: None,
            last_error: None,
        }
    }
}

/// Counts of jobs per bucket: armed, idle, failed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobSummary {
    /// Jobs with an armed timer that are not in error.
    pub running: usize,
    /// Jobs without an armed timer that are not in error.
    pub stopped: usize,
    /// Jobs in error.
    pub errors: usize,
}

impl JobSummary {
    /// Bucket every status in `jobs`.
    pub fn of(jobs: &[JobStatus]) -> Self {
        jobs.iter().fold(Self::default(), |mut acc, j| {
            match (j.status, j.enabled) {
                (JobState::Error, _) => acc.errors += 1,
                (_, true) => acc.running += 1,
                (_, false) => acc.stopped += 1,
            }
            acc
        })
    }
}

/// Outcome of one automatic-recovery sweep.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs inspected.
    pub total: usize,
    /// Jobs not in error after the sweep.
    pub healthy: usize,
    /// Jobs still in error after the sweep.
    pub error: usize,
    /// Jobs restarted by the sweep.
    pub recovered: usize,
}

/// Parse a cron expression.
///
/// Accepts the standard 5-field form (minute precision, day-of-week `0`-`7`
/// with Sunday as `0` or `7`) as well as the 6/7-field form of the `cron`
/// crate, which has a leading seconds column and numbers Sunday as `1`.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if let [minute, hour, dom, month, dow] = fields[..] {
        Schedule::from_str(&format!("0 {minute} {hour} {dom} {month} {}", crate_weekdays(dow)))
    } else {
        Schedule::from_str(expr.trim())
    }
}

/// Rewrite a standard day-of-week field (Sunday = 0 or 7) into the `cron`
/// crate's numbering (Sunday = 1). Named and non-numeric items pass through.
fn crate_weekdays(field: &str) -> String {
    field.split(',').map(crate_weekday_item).collect::<Vec<_>>().join(",")
}

fn crate_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (item, None),
    };
    let with_step = |r: String| match step {
        Some(s) => format!("{r}/{s}"),
        None => r,
    };
    let day = |n: u8| if n == 7 { 1 } else { n.saturating_add(1) };

    if let Ok(n) = range.parse::<u8>() {
        return with_step(day(n).to_string());
    }
    let Some((a, b)) = range.split_once('-') else {
        return item.to_string();
    };
    let (Ok(a), Ok(b)) = (a.parse::<u8>(), b.parse::<u8>()) else {
        return item.to_string();
    };
    match (a, b) {
        // 0-7 and 1-7 cover the whole week
        (0 | 1, 7) => with_step("1-7".to_string()),
        (7, 7) => with_step("1".to_string()),
        // x-7 ends on Sunday, which wraps to 1
        (a, 7) => format!("{},1", with_step(format!("{}-7", day(a)))),
        (a, b) => with_step(format!("{}-{}", day(a), day(b))),
    }
}
