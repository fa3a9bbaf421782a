use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pulse_core::cfg::{ConfigPatch, MonitoringConfig, ValidationError};
use pulse_core::logfile::{LogRecord, StructuredLogger};
use pulse_core::probe::{HealthVerdict, ProbeResult};
use tracing::{debug, info, warn};

use crate::runner::Prober;
use crate::scheduler::Job;

/// Id of the self-health job in the scheduler and on every log record.
pub const HEALTH_JOB_ID: &str = "health-check";

/// Probes the hosting process with a fixed-delay retry policy and logs every attempt.
pub struct HealthMonitor {
    config: RwLock<MonitoringConfig>,
    logger: RwLock<Arc<StructuredLogger>>,
    prober: Arc<dyn Prober>,
}

impl HealthMonitor {
    pub fn new(config: MonitoringConfig, prober: Arc<dyn Prober>) -> Result<Self, ValidationError> {
        Self::validate_config(&config)?;
        let logger = Arc::new(StructuredLogger::new(config.logging.clone()));
        Ok(Self { config: RwLock::new(config), logger: RwLock::new(logger), prober })
    }

    pub fn validate_config(config: &MonitoringConfig) -> Result<(), ValidationError> {
        config.validate()
    }

    /// Copy of the live configuration.
    pub fn config(&self) -> MonitoringConfig {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn logger(&self) -> Arc<StructuredLogger> {
        Arc::clone(&self.logger.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Merge `patch` into the live config. A logging change swaps in a new logger
    /// before the next append.
    pub fn update_config(&self, patch: &ConfigPatch) -> Result<MonitoringConfig, ValidationError> {
        let mut cfg = self.config.write().unwrap_or_else(|p| p.into_inner());
        let next = cfg.apply(patch)?;
        if next.logging != cfg.logging {
            let logger = Arc::new(StructuredLogger::new(next.logging.clone()));
            *self.logger.write().unwrap_or_else(|p| p.into_inner()) = logger;
            info!(path = %next.logging.file_path.display(), format = %next.logging.format, "health logger reconfigured");
        }
        *cfg = next.clone();
        info!(schedule = %next.schedule, endpoint = %next.target_url(), "monitoring config updated");
        Ok(next)
    }

    /// One probe against the configured endpoint, logged with `retry_count = attempt`.
    pub async fn perform_once(&self, attempt: u32) -> ProbeResult {
        let cfg = self.config();
        self.attempt(&cfg, attempt).await
    }

    /// Up to `max_retries + 1` attempts, `retry_delay_ms` apart; stops at the first 2xx.
    pub async fn perform_with_retry(&self) -> ProbeResult {
        let cfg = self.config();
        let delay = Duration::from_millis(cfg.retry_delay_ms);
        let mut attempt = 0;
        loop {
            let result = self.attempt(&cfg, attempt).await;
            if result.is_success() {
                if attempt > 0 {
                    info!(attempt, endpoint = %result.endpoint, "health check recovered after retry");
                }
                return result;
            }
            if attempt >= cfg.max_retries {
                warn!(
                    attempts = attempt + 1,
                    endpoint = %result.endpoint,
                    code = result.http_status_code,
                    error = result.error.as_deref().unwrap_or(""),
                    "health check failed after all attempts"
                );
                return result;
            }
            debug!(attempt, delay_ms = cfg.retry_delay_ms, "health check failed; retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, cfg: &MonitoringConfig, attempt: u32) -> ProbeResult {
        let started = Instant::now();
        let result = self
            .prober
            .probe(&cfg.target_url(), Duration::from_millis(cfg.timeout_ms))
            .await;
        if cfg.logging.enabled {
            let record = LogRecord::new(
                result.clone(),
                HEALTH_JOB_ID,
                attempt,
                started.elapsed().as_millis() as u64,
                cfg.environment.as_str(),
            );
            self.logger().append(&record);
        }
        result
    }
}

/// Scheduler adapter: one fire = one retry cycle. An unhealthy verdict is an
/// observation, not a job failure.
pub struct HealthCheckJob {
    monitor: Arc<HealthMonitor>,
}

impl HealthCheckJob {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> &str {
        "Health Check"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let result = self.monitor.perform_with_retry().await;
        match result.status {
            HealthVerdict::Healthy => {
                debug!(ms = result.response_time_ms, "health check healthy")
            }
            HealthVerdict::Degraded => {
                warn!(code = result.http_status_code, error = ?result.error, "health check degraded")
            }
            HealthVerdict::Unhealthy => {
                warn!(code = result.http_status_code, error = ?result.error, "health check unhealthy")
            }
        }
        Ok(())
    }
}
