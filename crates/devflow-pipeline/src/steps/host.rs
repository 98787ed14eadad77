//! ホストへの引き渡しと終了待ち

use crate::engine::PipelineStep;
use crate::error::Result;
use crate::host::{HostPlan, OrchestrationHost};
use crate::state::ApplicationState;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 起動計画をホストに渡す
pub struct StartHostStep {
    host: Arc<dyn OrchestrationHost>,
    started: AtomicBool,
}

impl StartHostStep {
    pub fn new(host: Arc<dyn OrchestrationHost>) -> Self {
        Self {
            host,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PipelineStep for StartHostStep {
    fn name(&self) -> &str {
        "start-host"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        let plan = HostPlan::from_state(state);
        // 途中で失敗しても stop で後始末できるよう先に立てる
        self.started.store(true, Ordering::SeqCst);
        self.host.start(&plan).await?;

        info!(
            containers = plan.dependency_services.len() + plan.service_containers.len(),
            processes = plan.processes.len(),
            manual = plan.start_services_manually,
            "Host started"
        );
        Ok(())
    }

    async fn stop(&self, _state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.host.stop().await
    }
}

/// キャンセルされるまで待機
pub struct WaitForShutdownStep;

#[async_trait]
impl PipelineStep for WaitForShutdownStep {
    fn name(&self) -> &str {
        "wait-for-shutdown"
    }

    async fn start(&self, _state: &mut ApplicationState, token: &CancellationToken) -> Result<()> {
        info!("Running; press Ctrl+C to stop");
        token.cancelled().await;
        info!("Shutdown requested");
        Ok(())
    }
}
