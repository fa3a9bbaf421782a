mod control;
mod module;
mod monitor;
mod recovery;
mod runner;
mod scheduler;
#[cfg(test)]
mod testkit;
#[cfg(feature = "web-api")]
mod web;

use std::sync::Arc;

use anyhow::Context;
use pulse_core::{cfg::{self, AppId, Config}, logx};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};

use crate::control::ControlSurface;
use crate::module::{Module, ModuleCtx};
use crate::recovery::Recovery;
use crate::runner::HttpProber;

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"), // <- no literal; comes from crate name
};

const RECOVERY_PERIOD: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let cfg = cfg::load_or_init(&APP)?
        .with_env_overrides()
        .context("environment overrides")?;
    logx::init(&cfg.log_level);

    info!("{} boot", APP.application);
    build_runtime()?.block_on(run(cfg))
}

#[cfg(feature = "rt-single")]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

#[cfg(not(feature = "rt-single"))]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .enable_all()
        .build()
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let control = Arc::new(
        ControlSurface::initialize(cfg.monitoring.clone(), Arc::new(HttpProber::new()))
            .context("initialize health monitoring")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = ModuleCtx { control: Arc::clone(&control), shutdown: shutdown_rx };

    #[allow(unused_mut)]
    let mut modules: Vec<Box<dyn Module>> = vec![Box::new(Recovery::new(RECOVERY_PERIOD))];
    #[cfg(feature = "web-api")]
    {
        let addr: std::net::SocketAddr = cfg
            .listen_addr
            .parse()
            .with_context(|| format!("parse listen_addr {}", cfg.listen_addr))?;
        modules.push(Box::new(web::WebServer::new(addr)));
    }

    let handles: Vec<_> = modules
        .into_iter()
        .map(|m| {
            let name = m.name();
            info!(module = name, "starting");
            (name, m.spawn(ctx.clone()))
        })
        .collect();

    wait_for_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    control.shutdown().await;

    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(module = name, error = %e, "module failed"),
            Err(e) => error!(module = name, error = %e, "module task panicked"),
        }
    }
    info!("{} stopped", APP.application);
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}
