//! コンテナ内でのコマンド実行
//!
//! 依存サービスの準備確認（mongosh, pg_isready など）に使用します。

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::error::{ContainerError, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures_util::stream::StreamExt;
use tracing::debug;

/// コマンド実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// コンテナエンジンへの操作
#[async_trait]
pub trait ContainerExec: Send + Sync {
    /// エンジンへの疎通確認
    async fn ping(&self) -> Result<()>;

    /// 起動中のコンテナでコマンドを実行し、出力と終了コードを返す
    async fn exec(&self, container: &str, cmd: &[&str]) -> Result<ExecOutput>;
}

/// bollard による実装
#[derive(Debug, Clone)]
pub struct DockerExec {
    docker: Docker,
}

impl DockerExec {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerExec for DockerExec {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(())
    }

    async fn exec(&self, container: &str, cmd: &[&str]) -> Result<ExecOutput> {
        debug!(container, cmd = ?cmd, "Executing command in container");

        let exec_config = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect::<Vec<String>>()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let message = self.docker.create_exec(container, exec_config).await?;

        let mut result = ExecOutput::default();
        match self
            .docker
            .start_exec(&message.id, Some(StartExecOptions::default()))
            .await?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            result.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            result.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => {
                            return Err(ContainerError::ExecFailed {
                                container: container.to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        // 終了コードの取得
        let inspect = self.docker.inspect_exec(&message.id).await?;
        result.exit_code = inspect.exit_code.unwrap_or(-1);

        debug!(container, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}
