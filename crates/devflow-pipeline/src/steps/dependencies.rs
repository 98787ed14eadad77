//! 依存サービスのポート予約・起動準備・準備完了確認

use crate::dependencies::{BeforeStartContext, ReadinessOutcome, create_handler, fixed_ports};
use crate::engine::PipelineStep;
use crate::error::{PipelineError, Result};
use crate::state::ApplicationState;
use async_trait::async_trait;
use devflow_container::{ContainerExec, find_pids_by_port, is_port_in_use};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// プロキシと依存サービスの固定ポートを事前に予約
pub struct ReservePortsStep;

#[async_trait]
impl PipelineStep for ReservePortsStep {
    fn name(&self) -> &str {
        "reserve-ports"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        state.ports.reserve(state.settings.proxy_port)?;

        for dependency in &state.dependencies {
            let dependency_type = dependency.dependency_type();
            for &port in fixed_ports(dependency_type) {
                state.ports.reserve(port)?;

                // 前回の実行で残ったコンテナの可能性もあるため警告のみ
                if is_port_in_use(port) {
                    let pids = find_pids_by_port(port);
                    warn!(
                        dependency = %dependency_type,
                        port,
                        pids = ?pids,
                        "Port is already in use"
                    );
                }
            }
        }

        info!(ports = ?state.ports.reserved(), "Fixed ports reserved");
        Ok(())
    }
}

/// 依存サービスの compose 定義と接続情報を生成
pub struct BeforeStartDependenciesStep {
    exec: Arc<dyn ContainerExec>,
}

impl BeforeStartDependenciesStep {
    pub fn new(exec: Arc<dyn ContainerExec>) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl PipelineStep for BeforeStartDependenciesStep {
    fn name(&self) -> &str {
        "before-start-dependencies"
    }

    async fn start(&self, state: &mut ApplicationState, token: &CancellationToken) -> Result<()> {
        for dependency in &state.dependencies {
            let handler = create_handler(dependency, Arc::clone(&self.exec));
            // 失敗時も stop で解放できるよう先に登録
            state.handlers.push(Arc::clone(&handler));

            let mut ctx = BeforeStartContext {
                compose: &mut state.compose,
                environment: &mut state.environment,
                paths: &state.paths,
                token,
            };
            handler.before_start(&mut ctx)?;
            info!(dependency = %handler.dependency_type(), "Dependency configured");
        }
        Ok(())
    }

    async fn stop(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        let mut errors = Vec::new();
        for handler in state.handlers.drain(..).rev() {
            if let Err(e) = handler.stop().await {
                warn!(dependency = %handler.dependency_type(), error = %e, "Dependency handler failed to stop");
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(PipelineError::StopFailedMany(errors)),
        }
    }
}

/// 全依存サービスの準備完了を並行して確認
///
/// 一時的な失敗は警告に留め、実行は継続します。
pub struct AfterStartDependenciesStep;

#[async_trait]
impl PipelineStep for AfterStartDependenciesStep {
    fn name(&self) -> &str {
        "after-start-dependencies"
    }

    async fn start(&self, state: &mut ApplicationState, token: &CancellationToken) -> Result<()> {
        let handlers = state.handlers.clone();
        let results = join_all(handlers.iter().map(|handler| async move {
            (handler.dependency_type(), handler.after_start(token).await)
        }))
        .await;

        for (dependency_type, result) in results {
            match result {
                Ok(ReadinessOutcome::Ready) => info!(dependency = %dependency_type, "Dependency ready"),
                Ok(ReadinessOutcome::Degraded) => state.degraded.push(dependency_type),
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e @ PipelineError::TransientDependency { .. }) => {
                    warn!(dependency = %dependency_type, error = %e, "Dependency bootstrap failed; continuing");
                    state.degraded.push(dependency_type);
                }
                Err(e) => return Err(e),
            }
        }

        if !state.degraded.is_empty() {
            warn!(degraded = ?state.degraded, "Some dependencies are running in a degraded state");
        }
        Ok(())
    }
}
