//! Docker 接続

use crate::error::{ContainerError, Result};
use bollard::Docker;
use tracing::debug;

/// ローカルのDockerデーモン用クライアントを生成
///
/// 実際の疎通確認は `ContainerExec::ping` で行います。
pub fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
    debug!("Docker client created");
    Ok(docker)
}
