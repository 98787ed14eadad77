//! 実行環境の前提条件

use crate::certificates::CertificateManager;
use crate::engine::PipelineStep;
use crate::error::{PipelineError, Result};
use crate::state::ApplicationState;
use async_trait::async_trait;
use chrono::Utc;
use devflow_container::ContainerExec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const WRITE_MARKER: &str = ".devflow-write-test";

/// コンテナエンジンへの疎通確認
pub struct EnsureDockerStep {
    exec: Arc<dyn ContainerExec>,
}

impl EnsureDockerStep {
    pub fn new(exec: Arc<dyn ContainerExec>) -> Self {
        Self { exec }
    }
}

#[async_trait]
impl PipelineStep for EnsureDockerStep {
    fn name(&self) -> &str {
        "ensure-docker"
    }

    async fn start(&self, _state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        self.exec.ping().await.map_err(|e| {
            PipelineError::precondition(
                format!("Dockerに接続できません: {}", e),
                "Docker Desktop または dockerd が起動しているか確認してください",
            )
        })?;
        debug!("Docker is reachable");
        Ok(())
    }
}

/// 生成ファイルの出力先を作成し、書き込めることを確認
pub struct PrepareGeneratedDirectoryStep;

#[async_trait]
impl PipelineStep for PrepareGeneratedDirectoryStep {
    fn name(&self) -> &str {
        "prepare-generated-directory"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        let dir = &state.paths.dir;
        let unwritable = |e: std::io::Error| {
            PipelineError::precondition(
                format!("生成ファイルの出力先に書き込めません: {} ({})", dir.display(), e),
                "ディレクトリの権限を確認するか、settings.yaml の generated_dir を変更してください",
            )
        };

        std::fs::create_dir_all(dir).map_err(unwritable)?;
        let marker = dir.join(WRITE_MARKER);
        std::fs::write(&marker, b"").map_err(unwritable)?;
        std::fs::remove_file(&marker).map_err(unwritable)?;

        info!(dir = %dir.display(), "Generated directory ready");
        Ok(())
    }
}

/// プロキシ用の証明書を用意（公開ホストがある場合のみ）
pub struct EnsureCertificateStep;

#[async_trait]
impl PipelineStep for EnsureCertificateStep {
    fn name(&self) -> &str {
        "ensure-certificate"
    }

    async fn start(&self, state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        if !state.has_public_hosts() {
            debug!("No public hosts; skipping certificate");
            return Ok(());
        }

        let manager = CertificateManager::new(
            state.tools.mkcert.clone(),
            state.tools.openssl.clone(),
            state.paths.certificate_file(),
            state.paths.certificate_key_file(),
        );
        manager.ensure(Utc::now()).await?;
        state.certificate = Some(manager.certificate());
        Ok(())
    }
}
