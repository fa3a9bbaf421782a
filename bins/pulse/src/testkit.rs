use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::cfg::MonitoringConfig;
use pulse_core::probe::ProbeResult;

use crate::runner::Prober;

/// Prober that answers from a queue of status codes; `0` means connection refused.
pub struct ScriptedProber {
    codes: Mutex<VecDeque<u16>>,
    fallback: u16,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(codes: impl IntoIterator<Item = u16>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            codes: Mutex::new(codes.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(code: u16) -> Arc<Self> {
        Self::new([], code)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &str, _timeout: Duration) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let code = self.codes.lock().unwrap().pop_front().unwrap_or(self.fallback);
        if code == 0 {
            ProbeResult::unreachable(endpoint, 1, "connection refused")
        } else {
            ProbeResult::from_response(endpoint, code, 1, None)
        }
    }
}

/// Hourly schedule, fast retries, JSON log under `dir`.
pub fn config_in(dir: &Path) -> MonitoringConfig {
    let mut cfg = MonitoringConfig {
        schedule: "0 * * * *".to_string(),
        retry_delay_ms: 10,
        timeout_ms: 2_000,
        environment: "test".to_string(),
        ..MonitoringConfig::default()
    };
    cfg.logging.file_path = dir.join("health-check.log");
    cfg
}
