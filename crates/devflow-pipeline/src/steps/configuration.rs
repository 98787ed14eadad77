//! 設定ファイルの読み込みとrunner選択

use crate::engine::PipelineStep;
use crate::error::Result;
use crate::state::ApplicationState;
use async_trait::async_trait;
use devflow_core::{ConfigAggregator, RunnerKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 設定ファイルを集約して状態に取り込む
pub struct LoadConfigurationStep;

#[async_trait]
impl PipelineStep for LoadConfigurationStep {
    fn name(&self) -> &str {
        "load-configuration"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        let paths = state.options.config_paths.clone();
        let aggregator = match &state.options.search_dir {
            Some(dir) => ConfigAggregator::with_search_dir(paths, dir),
            None => ConfigAggregator::new(paths),
        };

        let documents = aggregator.documents_required()?;
        state.dependencies = aggregator.dependencies()?;
        for service in aggregator.services() {
            state.services.insert(service.key(), service);
        }

        info!(
            files = documents.len(),
            services = state.services.len(),
            dependencies = state.dependencies.len(),
            "Configuration loaded"
        );
        Ok(())
    }
}

/// `--remote-env` とユーザー設定から優先runnerを決定
///
/// `--remote-env` に一致する remote runner があればユーザー設定より優先します。
pub struct ApplyPreferencesStep;

#[async_trait]
impl PipelineStep for ApplyPreferencesStep {
    fn name(&self) -> &str {
        "apply-preferences"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        let remote_env = state.options.remote_env.clone();
        let preferences = state.options.preferences.clone();

        for service in state.services.values_mut() {
            if let Some(env) = remote_env.as_deref()
                && service.select_remote_environment(env)
            {
                info!(service = %service.name, environment = env, "Using remote runner");
                continue;
            }

            let Some(tag) = preferences.runner_for(&service.name) else {
                continue;
            };

            match RunnerKind::parse(tag) {
                Some(kind) if service.declares_runner(kind) => {
                    info!(service = %service.name, runner = %kind, "Using preferred runner");
                    service.preferred_runner = Some(kind);
                }
                Some(kind) => warn!(
                    service = %service.name,
                    runner = %kind,
                    "Preferred runner is not declared by the service; ignoring"
                ),
                None => warn!(service = %service.name, runner = tag, "Unknown preferred runner; ignoring"),
            }
        }
        Ok(())
    }
}
