//! サービスの解決とプロキシ設定

use crate::engine::PipelineStep;
use crate::error::Result;
use crate::proxy;
use crate::services::resolve_all;
use crate::state::ApplicationState;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ResolveServicesStep;

#[async_trait]
impl PipelineStep for ResolveServicesStep {
    fn name(&self) -> &str {
        "resolve-services"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        resolve_all(state)
    }
}

pub struct ConfigureReverseProxyStep;

#[async_trait]
impl PipelineStep for ConfigureReverseProxyStep {
    fn name(&self) -> &str {
        "configure-reverse-proxy"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        state.proxy = proxy::synthesize(state.services.values());
        info!(
            routes = state.proxy.routes().len(),
            port = state.settings.proxy_port,
            "Reverse proxy configured"
        );
        Ok(())
    }
}
