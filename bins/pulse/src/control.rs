use std::sync::Arc;

use pulse_core::cfg::{ConfigPatch, MonitoringConfig, ValidationError};
use pulse_core::job::{JobStatus, JobSummary, RecoveryReport};
use pulse_core::logfile::{LogRecord, LoggerStats};
use pulse_core::probe::ProbeResult;
use serde::Serialize;
use tracing::info;

use crate::monitor::{HealthCheckJob, HealthMonitor, HEALTH_JOB_ID};
use crate::runner::Prober;
use crate::scheduler::{JobScheduler, SchedulerError};

/// Bounds accepted by [`ControlSurface::get_recent_logs`].
pub const MAX_LOG_LIMIT: i64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<SchedulerError> for ControlError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NotFound(id) => ControlError::NotFound(id),
            SchedulerError::InvalidSchedule { reason, .. } => {
                ValidationError::field("schedule", format!("invalid cron expression: {reason}")).into()
            }
            SchedulerError::AlreadyRegistered(id) => {
                ValidationError::field("id", format!("{id} is already registered")).into()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStats {
    pub logging: LoggerStats,
    pub cron_jobs: CronJobStats,
    pub configuration: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct CronJobStats {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub errors: usize,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobStatus>,
    pub summary: JobSummary,
}

/// Entry point for every external control request. Only obtainable through
/// [`ControlSurface::initialize`], so a handle always has a live monitor and scheduler.
pub struct ControlSurface {
    scheduler: Arc<JobScheduler>,
    monitor: Arc<HealthMonitor>,
}

impl ControlSurface {
    /// Validate `config`, build the monitor and register the health job.
    /// Must run inside a tokio runtime when the job is enabled.
    pub fn initialize(config: MonitoringConfig, prober: Arc<dyn Prober>) -> Result<Self, ControlError> {
        let monitor = Arc::new(HealthMonitor::new(config.clone(), prober)?);
        let scheduler = Arc::new(JobScheduler::new());
        scheduler.register(
            HEALTH_JOB_ID,
            &config.schedule,
            config.enabled,
            Arc::new(HealthCheckJob::new(Arc::clone(&monitor))),
        )?;
        info!(
            endpoint = %config.target_url(),
            schedule = %config.schedule,
            enabled = config.enabled,
            "health monitoring initialized"
        );
        Ok(Self { scheduler, monitor })
    }

    pub fn get_stats(&self) -> MonitoringStats {
        let jobs = self.scheduler.all_statuses();
        let summary = JobSummary::of(&jobs);
        MonitoringStats {
            logging: self.monitor.logger().stats(),
            cron_jobs: CronJobStats {
                total: jobs.len(),
                running: summary.running,
                stopped: summary.stopped,
                errors: summary.errors,
                jobs,
            },
            configuration: self.monitor.config(),
        }
    }

    pub fn get_job_status(&self, id: &str) -> Result<JobStatus, ControlError> {
        self.scheduler
            .status_of(id)
            .ok_or_else(|| ControlError::NotFound(id.to_string()))
    }

    pub fn list_job_statuses(&self) -> JobList {
        let jobs = self.scheduler.all_statuses();
        let summary = JobSummary::of(&jobs);
        JobList { jobs, summary }
    }

    pub fn start_job(&self, id: &str) -> Result<bool, ControlError> {
        let changed = self.scheduler.start(id)?;
        self.sync_enabled(id, true)?;
        Ok(changed)
    }

    pub fn stop_job(&self, id: &str) -> Result<bool, ControlError> {
        let changed = self.scheduler.stop(id)?;
        self.sync_enabled(id, false)?;
        Ok(changed)
    }

    // the health job's armed state is mirrored in `MonitoringConfig.enabled`
    fn sync_enabled(&self, id: &str, enabled: bool) -> Result<(), ControlError> {
        if id == HEALTH_JOB_ID && self.monitor.config().enabled != enabled {
            let patch = ConfigPatch { enabled: Some(enabled), ..Default::default() };
            self.monitor.update_config(&patch)?;
        }
        Ok(())
    }

    /// Immediate out-of-band probe cycle; job counters are not touched.
    pub async fn trigger_check(&self) -> ProbeResult {
        info!("manual health check requested");
        self.monitor.perform_with_retry().await
    }

    /// Run a job body now and return its updated status.
    pub async fn trigger_job(&self, id: &str) -> Result<JobStatus, ControlError> {
        Ok(self.scheduler.trigger(id).await?)
    }

    pub fn get_config(&self) -> MonitoringConfig {
        self.monitor.config()
    }

    /// Apply a partial update; schedule and enabled changes reach the health job.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<MonitoringConfig, ControlError> {
        let before = self.monitor.config();
        let next = self.monitor.update_config(patch)?;
        if next.schedule != before.schedule {
            self.scheduler.reschedule(HEALTH_JOB_ID, &next.schedule)?;
        }
        let armed = self.get_job_status(HEALTH_JOB_ID)?.enabled;
        if next.enabled != armed {
            if next.enabled {
                self.scheduler.start(HEALTH_JOB_ID)?;
            } else {
                self.scheduler.stop(HEALTH_JOB_ID)?;
            }
        }
        Ok(next)
    }

    /// Most recent records first. `limit` must lie in `1..=1000`.
    pub fn get_recent_logs(&self, limit: i64) -> Result<Vec<LogRecord>, ControlError> {
        if !(1..=MAX_LOG_LIMIT).contains(&limit) {
            return Err(ValidationError::field("limit", format!("must be between 1 and {MAX_LOG_LIMIT}")).into());
        }
        Ok(self.monitor.logger().recent(limit as usize))
    }

    /// Irreversibly delete every health log file.
    pub fn clear_logs(&self) {
        let removed = self.monitor.logger().clear();
        info!(removed, "health logs cleared by operator");
    }

    pub fn recover_errors(&self) -> RecoveryReport {
        self.scheduler.recover_errors()
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }
}
