//! 生成ファイルの書き出し
//!
//! 環境変数レジストリを確定させ、ワークロードへ接続情報を注入してから
//! compose ファイル、プロセス定義、アプリケーション設定、プロキシ設定を書き出します。
//! ワークロードに宣言済みの値がある変数は上書きしません。

use crate::engine::PipelineStep;
use crate::environment::{Scope, to_settings_tree};
use crate::error::{PipelineError, Result};
use crate::state::ApplicationState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct WriteArtifactsStep;

impl WriteArtifactsStep {
    fn inject_environment(state: &mut ApplicationState) {
        state.environment.freeze();
        let host = state.environment.resolve(Scope::Host);
        let container = state.environment.resolve(Scope::Container);

        for process in state.processes.processes.values_mut() {
            merge_missing(&mut process.env, &host);
        }
        for name in &state.service_containers {
            if let Some(service) = state.compose.services.get_mut(name) {
                merge_missing(&mut service.environment, &container);
            }
        }
    }
}

#[async_trait]
impl PipelineStep for WriteArtifactsStep {
    fn name(&self) -> &str {
        "write-artifacts"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        Self::inject_environment(state);

        write_file(&state.paths.compose_file(), &state.compose.to_yaml()?)?;
        write_file(&state.paths.processes_file(), &state.processes.to_yaml()?)?;

        let settings = to_settings_tree(&state.environment.resolve(Scope::Host));
        let settings = serde_json::to_string_pretty(&settings)
            .map_err(|e| PipelineError::Unhandled(e.into()))?;
        write_file(&state.paths.app_settings_file(), &settings)?;

        write_file(&state.paths.proxy_file(), &state.proxy.to_json()?)?;

        info!(
            dir = %state.paths.dir.display(),
            containers = state.compose.services.len(),
            processes = state.processes.processes.len(),
            variables = state.environment.entries().len(),
            "Artifacts written"
        );
        Ok(())
    }
}

fn merge_missing(target: &mut BTreeMap<String, String>, vars: &BTreeMap<String, String>) {
    for (name, value) in vars {
        target
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| {
        PipelineError::Unhandled(anyhow::anyhow!(
            "{} の書き込みに失敗しました: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GeneratedPaths;
    use devflow_container::{ComposeService, ProcessDefinition};
    use serde_json::Value;

    #[tokio::test]
    async fn test_write_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        let mut state = ApplicationState::new(
            Default::default(),
            Default::default(),
            GeneratedPaths::new(temp.path()),
        );

        state
            .environment
            .add_both(
                "ConnectionStrings__Redis",
                "localhost:6379",
                "host.docker.internal:6379",
            )
            .unwrap();
        state
            .environment
            .add_both("PORT", "9999", "9999")
            .unwrap();
        state.processes.add(ProcessDefinition {
            name: "web".to_string(),
            command: "npm".to_string(),
            args: vec![],
            working_directory: temp.path().to_path_buf(),
            env: BTreeMap::from([("PORT".to_string(), "5000".to_string())]),
        });
        state
            .compose
            .add_service("api", ComposeService::new("api:latest", "api-1234abcd"));
        state.service_containers.insert("api".to_string());
        state
            .compose
            .add_service("redis", ComposeService::new("redis:7-alpine", "devflow-redis"));

        WriteArtifactsStep
            .start(&mut state, &CancellationToken::new())
            .await
            .unwrap();

        assert!(state.environment.is_frozen());
        let web = &state.processes.processes["web"];
        assert_eq!(web.env["PORT"], "5000");
        assert_eq!(web.env["ConnectionStrings__Redis"], "localhost:6379");
        assert_eq!(
            state.compose.services["api"].environment["ConnectionStrings__Redis"],
            "host.docker.internal:6379"
        );
        assert!(state.compose.services["redis"].environment.is_empty());

        let settings: Value = serde_json::from_str(
            &std::fs::read_to_string(state.paths.app_settings_file()).unwrap(),
        )
        .unwrap();
        assert_eq!(settings["ConnectionStrings"]["Redis"], "localhost:6379");

        assert!(state.paths.compose_file().exists());
        assert!(state.paths.processes_file().exists());
        assert!(state.paths.proxy_file().exists());
    }
}
