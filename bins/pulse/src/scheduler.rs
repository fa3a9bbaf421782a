use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use pulse_core::job::{parse_schedule, JobState, JobStatus, RecoveryReport};

/// Jobs that failed this many times since their last restart are left alone by `recover_errors`.
pub const MAX_RECOVERY_ERRORS: u64 = 5;

/// How long `shutdown` waits for an in-flight execution before aborting its timer.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A unit of recurring work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },
}

struct Timer {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct JobSlot {
    job: Arc<dyn Job>,
    schedule: Schedule,
    status: Arc<Mutex<JobStatus>>,
    timer: Option<Timer>,
}

impl JobSlot {
    fn armed(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.handle.is_finished())
    }
}

/// Owns the named recurring jobs of this process and their runtime status.
#[derive(Default)]
pub struct JobScheduler {
    jobs: Mutex<HashMap<String, JobSlot>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, JobSlot>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register `job` under `id`. The timer is armed immediately when `enabled`.
    pub fn register(
        &self,
        id: &str,
        expression: &str,
        enabled: bool,
        job: Arc<dyn Job>,
    ) -> Result<(), SchedulerError> {
        let schedule = compile(expression)?;
        let mut jobs = self.slots();
        if jobs.contains_key(id) {
            return Err(SchedulerError::AlreadyRegistered(id.to_string()));
        }
        let status = JobStatus::new(id, job.name(), expression.trim());
        let mut slot = JobSlot { job, schedule, status: Arc::new(Mutex::new(status)), timer: None };
        if enabled {
            arm(id, &mut slot);
        }
        jobs.insert(id.to_string(), slot);
        info!(job_id = %id, schedule = %expression, enabled, "job registered");
        Ok(())
    }

    /// Arm the job's timer. `Ok(false)` if it was already armed.
    pub fn start(&self, id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.slots();
        let slot = jobs.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        if slot.armed() {
            return Ok(false);
        }
        arm(id, slot);
        info!(job_id = %id, "job started");
        Ok(true)
    }

    /// Disarm the job's timer. An in-flight execution is left to finish. `Ok(false)` if already stopped.
    pub fn stop(&self, id: &str) -> Result<bool, SchedulerError> {
        let mut jobs = self.slots();
        let slot = jobs.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let was_armed = slot.armed();
        disarm(slot);
        if was_armed {
            info!(job_id = %id, "job stopped");
        }
        Ok(was_armed)
    }

    /// Stop, forget accumulated errors, start again.
    pub fn restart(&self, id: &str) -> Result<(), SchedulerError> {
        let mut jobs = self.slots();
        let slot = jobs.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        disarm(slot);
        {
            let mut st = lock(&slot.status);
            st.last_error = None;
            st.error_count = 0;
            st.status = JobState::Stopped;
        }
        arm(id, slot);
        info!(job_id = %id, "job restarted");
        Ok(())
    }

    /// Run the job body now, outside its schedule. Counters are updated as for a scheduled fire.
    pub async fn trigger(&self, id: &str) -> Result<JobStatus, SchedulerError> {
        let (job, status) = {
            let jobs = self.slots();
            let slot = jobs.get(id).ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            (Arc::clone(&slot.job), Arc::clone(&slot.status))
        };
        info!(job_id = %id, "job triggered manually");
        execute(id, &job, &status).await;
        let snapshot = lock(&status).clone();
        Ok(snapshot)
    }

    /// Replace the job's schedule, re-arming the timer if it was armed.
    pub fn reschedule(&self, id: &str, expression: &str) -> Result<(), SchedulerError> {
        let schedule = compile(expression)?;
        let mut jobs = self.slots();
        let slot = jobs.get_mut(id).ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let was_armed = slot.armed();
        disarm(slot);
        slot.schedule = schedule;
        lock(&slot.status).schedule = expression.trim().to_string();
        if was_armed {
            arm(id, slot);
        }
        info!(job_id = %id, schedule = %expression, "job rescheduled");
        Ok(())
    }

    /// Stop and drop a job, returning its final status.
    pub fn remove(&self, id: &str) -> Result<JobStatus, SchedulerError> {
        let mut slot = self
            .slots()
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        disarm(&mut slot);
        info!(job_id = %id, "job removed");
        let last = lock(&slot.status).clone();
        Ok(last)
    }

    /// Restart every job in error that has not yet hit [`MAX_RECOVERY_ERRORS`].
    pub fn recover_errors(&self) -> RecoveryReport {
        let candidates: Vec<String> = self
            .all_statuses()
            .into_iter()
            .filter(|s| s.status == JobState::Error)
            .filter(|s| {
                let eligible = s.error_count < MAX_RECOVERY_ERRORS;
                if !eligible {
                    warn!(job_id = %s.id, errors = s.error_count, "job exceeded recovery ceiling; leaving in error");
                }
                eligible
            })
            .map(|s| s.id)
            .collect();

        let mut recovered = 0;
        for id in candidates {
            match self.restart(&id) {
                Ok(()) => recovered += 1,
                Err(e) => warn!(job_id = %id, error = %e, "job recovery failed"),
            }
        }

        let all = self.all_statuses();
        let error = all.iter().filter(|s| s.status == JobState::Error).count();
        let report = RecoveryReport { total: all.len(), healthy: all.len() - error, error, recovered };
        if recovered > 0 {
            info!(?report, "recovery sweep restarted jobs");
        }
        report
    }

    /// Copy of one job's status.
    pub fn status_of(&self, id: &str) -> Option<JobStatus> {
        self.slots().get(id).map(|s| lock(&s.status).clone())
    }

    /// Copies of every job's status, ordered by id.
    pub fn all_statuses(&self) -> Vec<JobStatus> {
        let mut out: Vec<JobStatus> = self.slots().values().map(|s| lock(&s.status).clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Disarm every timer and wait briefly for in-flight executions.
    pub async fn shutdown(&self) {
        let timers: Vec<(String, JoinHandle<()>)> = {
            let mut jobs = self.slots();
            jobs.iter_mut()
                .filter_map(|(id, slot)| {
                    let timer = slot.timer.take()?;
                    let _ = timer.shutdown_tx.send(true);
                    let mut st = lock(&slot.status);
                    st.enabled = false;
                    st.next_run = None;
                    Some((id.clone(), timer.handle))
                })
                .collect()
        };
        for (id, mut handle) in timers {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!(job_id = %id, "job still running at shutdown; aborting");
                handle.abort();
            }
        }
        info!("scheduler stopped");
    }
}

fn compile(expression: &str) -> Result<Schedule, SchedulerError> {
    parse_schedule(expression).map_err(|e| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

fn lock(status: &Mutex<JobStatus>) -> MutexGuard<'_, JobStatus> {
    status.lock().unwrap_or_else(|p| p.into_inner())
}

fn arm(id: &str, slot: &mut JobSlot) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let mut st = lock(&slot.status);
        st.enabled = true;
        st.next_run = slot.schedule.upcoming(Utc).next();
    }
    let handle = tokio::spawn(run_timer(
        id.to_string(),
        Arc::clone(&slot.job),
        slot.schedule.clone(),
        Arc::clone(&slot.status),
        shutdown_rx,
    ));
    slot.timer = Some(Timer { handle, shutdown_tx });
}

fn disarm(slot: &mut JobSlot) {
    let mut st = lock(&slot.status);
    if let Some(timer) = slot.timer.take() {
        // Receiver may be gone if the timer already exited.
        let _ = timer.shutdown_tx.send(true);
    }
    st.enabled = false;
    st.next_run = None;
}

async fn run_timer(
    id: String,
    job: Arc<dyn Job>,
    schedule: Schedule,
    status: Arc<Mutex<JobStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let from = last_fire.map_or(now, |l| l.max(now));
        let Some(next) = schedule.after(&from).next() else {
            warn!(job_id = %id, "schedule has no upcoming fire time");
            break;
        };
        {
            let mut st = lock(&status);
            if *shutdown.borrow() {
                break;
            }
            st.next_run = Some(next);
        }
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                last_fire = Some(next);
                execute(&id, &job, &status).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(job_id = %id, "timer exited");
}

/// One execution of a job body with status bookkeeping. The body runs on its
/// own task so a panic is recorded like any other failure.
async fn execute(id: &str, job: &Arc<dyn Job>, status: &Mutex<JobStatus>) {
    lock(status).status = JobState::Running;
    let task = {
        let job = Arc::clone(job);
        tokio::spawn(async move { job.run().await })
    };
    let failure = match task.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) => Some(join_failure(e)),
    };

    let mut st = lock(status);
    st.run_count += 1;
    st.last_run = Some(Utc::now());
    match failure {
        None => {
            st.status = JobState::Stopped;
            st.last_error = None;
            debug!(job_id = %id, runs = st.run_count, "job ok");
        }
        Some(err) => {
            st.error_count += 1;
            st.status = JobState::Error;
            warn!(job_id = %id, errors = st.error_count, error = %err, "job err");
            st.last_error = Some(err);
        }
    }
}

fn join_failure(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("job task cancelled: {e}");
    }
    let payload = e.into_panic();
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {msg}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct Scripted {
        runs: AtomicU64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Job for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("log sink exploded");
            }
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Job for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self) -> anyhow::Result<()> {
            panic!("defect in job body");
        }
    }

    const HOURLY: &str = "0 * * * *";

    fn failing() -> Arc<Scripted> {
        let job = Arc::new(Scripted::default());
        job.fail.store(true, Ordering::SeqCst);
        job
    }

    #[tokio::test]
    async fn rejects_malformed_and_duplicate_registrations() {
        let s = JobScheduler::new();
        let err = s.register("a", "every minute", false, Arc::new(Scripted::default())).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert!(s.status_of("a").is_none());

        s.register("a", HOURLY, false, Arc::new(Scripted::default())).unwrap();
        let err = s.register("a", HOURLY, false, Arc::new(Scripted::default())).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn registers_stopped_unless_enabled() {
        let s = JobScheduler::new();
        s.register("off", HOURLY, false, Arc::new(Scripted::default())).unwrap();
        s.register("on", HOURLY, true, Arc::new(Scripted::default())).unwrap();

        let off = s.status_of("off").unwrap();
        assert!(!off.enabled);
        assert_eq!(off.status, JobState::Stopped);
        assert!(off.next_run.is_none());

        let on = s.status_of("on").unwrap();
        assert!(on.enabled);
        assert_eq!(on.name, "scripted");
        assert!(on.next_run.unwrap() > Utc::now());
        s.shutdown().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let s = JobScheduler::new();
        s.register("hc", HOURLY, true, Arc::new(Scripted::default())).unwrap();
        assert!(s.stop("hc").unwrap());
        assert!(!s.status_of("hc").unwrap().enabled);
        assert!(!s.stop("hc").unwrap());
        let st = s.status_of("hc").unwrap();
        assert!(!st.enabled);
        assert!(st.next_run.is_none());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let s = JobScheduler::new();
        s.register("hc", HOURLY, false, Arc::new(Scripted::default())).unwrap();
        assert!(s.start("hc").unwrap());
        assert!(!s.start("hc").unwrap());
        assert!(s.status_of("hc").unwrap().next_run.is_some());
        s.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let s = JobScheduler::new();
        assert!(matches!(s.start("x"), Err(SchedulerError::NotFound(_))));
        assert!(matches!(s.stop("x"), Err(SchedulerError::NotFound(_))));
        assert!(matches!(s.restart("x"), Err(SchedulerError::NotFound(_))));
        assert!(matches!(s.trigger("x").await, Err(SchedulerError::NotFound(_))));
        assert!(matches!(s.remove("x"), Err(SchedulerError::NotFound(_))));
    }

    #[tokio::test]
    async fn trigger_updates_counters_without_touching_schedule() {
        let s = JobScheduler::new();
        let job = Arc::new(Scripted::default());
        s.register("hc", HOURLY, false, job.clone()).unwrap();

        let st = s.trigger("hc").await.unwrap();
        assert_eq!(st.run_count, 1);
        assert_eq!(st.error_count, 0);
        assert_eq!(st.status, JobState::Stopped);
        assert!(st.last_run.is_some());
        assert!(!st.enabled);
        assert!(st.next_run.is_none());
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_drive_error_state_and_success_clears_it() {
        let s = JobScheduler::new();
        let job = failing();
        s.register("hc", HOURLY, false, job.clone()).unwrap();

        let st = s.trigger("hc").await.unwrap();
        assert_eq!(st.status, JobState::Error);
        assert_eq!(st.error_count, 1);
        assert_eq!(st.run_count, 1);
        assert!(st.last_error.unwrap().contains("log sink exploded"));

        job.fail.store(false, Ordering::SeqCst);
        let st = s.trigger("hc").await.unwrap();
        assert_eq!(st.status, JobState::Stopped);
        assert_eq!(st.run_count, 2);
        assert_eq!(st.error_count, 1);
        assert!(st.last_error.is_none());
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let s = JobScheduler::new();
        s.register("boom", HOURLY, false, Arc::new(Panics)).unwrap();
        let st = s.trigger("boom").await.unwrap();
        assert_eq!(st.status, JobState::Error);
        assert_eq!(st.run_count, 1);
        assert!(st.last_error.unwrap().contains("defect in job body"));
    }

    #[tokio::test]
    async fn restart_clears_errors() {
        let s = JobScheduler::new();
        s.register("hc", HOURLY, false, failing()).unwrap();
        s.trigger("hc").await.unwrap();
        s.restart("hc").unwrap();
        let st = s.status_of("hc").unwrap();
        assert_eq!(st.error_count, 0);
        assert!(st.last_error.is_none());
        assert_eq!(st.status, JobState::Stopped);
        assert!(st.enabled);
        assert_eq!(st.run_count, 1);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn recovery_respects_error_ceiling() {
        let s = JobScheduler::new();
        s.register("flaky", HOURLY, false, failing()).unwrap();
        s.register("broken", HOURLY, false, failing()).unwrap();
        s.register("fine", HOURLY, false, Arc::new(Scripted::default())).unwrap();
        for _ in 0..2 {
            s.trigger("flaky").await.unwrap();
        }
        for _ in 0..MAX_RECOVERY_ERRORS {
            s.trigger("broken").await.unwrap();
        }
        assert_eq!(s.status_of("broken").unwrap().error_count, 5);

        let report = s.recover_errors();
        assert_eq!(report, RecoveryReport { total: 3, healthy: 2, error: 1, recovered: 1 });

        let flaky = s.status_of("flaky").unwrap();
        assert_eq!(flaky.error_count, 0);
        assert_eq!(flaky.status, JobState::Stopped);
        assert!(flaky.enabled);

        let broken = s.status_of("broken").unwrap();
        assert_eq!(broken.status, JobState::Error);
        assert_eq!(broken.error_count, 5);
        assert!(!broken.enabled);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn timer_fires_on_schedule() {
        let s = JobScheduler::new();
        let job = Arc::new(Scripted::default());
        s.register("tick", "* * * * * *", true, job.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let st = s.status_of("tick").unwrap();
        assert!(st.run_count >= 1, "timer never fired");
        assert_eq!(st.run_count, job.runs.load(Ordering::SeqCst));
        assert!(st.next_run.is_some());

        s.shutdown().await;
        let st = s.status_of("tick").unwrap();
        assert!(!st.enabled);
        assert!(st.next_run.is_none());
        let after = st.run_count;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(s.status_of("tick").unwrap().run_count, after);
    }

    #[tokio::test]
    async fn reschedule_validates_and_rearms() {
        let s = JobScheduler::new();
        s.register("hc", HOURLY, true, Arc::new(Scripted::default())).unwrap();
        assert!(matches!(s.reschedule("hc", ""), Err(SchedulerError::InvalidSchedule { .. })));
        assert_eq!(s.status_of("hc").unwrap().schedule, HOURLY);

        s.reschedule("hc", "*/10 * * * *").unwrap();
        let st = s.status_of("hc").unwrap();
        assert_eq!(st.schedule, "*/10 * * * *");
        assert!(st.enabled);
        s.shutdown().await;
    }

    #[tokio::test]
    async fn remove_drops_job() {
        let s = JobScheduler::new();
        s.register("hc", HOURLY, true, Arc::new(Scripted::default())).unwrap();
        let last = s.remove("hc").unwrap();
        assert!(!last.enabled);
        assert!(s.all_statuses().is_empty());
    }
}
