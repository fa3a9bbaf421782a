use crate::module::{Module, ModuleCtx};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info};

/// Periodically restarts jobs stuck in error, within the scheduler's recovery ceiling.
pub struct Recovery { period: Duration }
impl Recovery { pub fn new(period: Duration) -> Self { Self { period } } }

impl Module for Recovery {
    fn name(&self) -> &'static str { "recovery" }
    fn spawn(self: Box<Self>, mut ctx: ModuleCtx) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + self.period, self.period);
            let mut sweeps: u64 = 0;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        sweeps += 1;
                        let report = ctx.control.recover_errors();
                        debug!(sweeps, ?report, "recovery sweep");
                    }
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            info!("recovery stopping after {} sweeps", sweeps);
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
