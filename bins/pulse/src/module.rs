use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::control::ControlSurface;

#[derive(Clone)]
pub struct ModuleCtx {
    pub control: Arc<ControlSurface>,
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

pub trait Module: Send + 'static {
    fn name(&self) -> &'static str;
    fn spawn(self: Box<Self>, ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>>;
}
