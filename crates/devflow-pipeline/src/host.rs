//! オーケストレーションホストとの境界
//!
//! パイプラインが生成した計画を受け取り、コンテナとプロセスを実際に起動・停止します。

use crate::certificates::TlsCertificate;
use crate::error::Result;
use crate::proxy::ProxyConfig;
use crate::state::ApplicationState;
use async_trait::async_trait;
use devflow_container::ProcessDefinition;
use std::path::PathBuf;

/// ホストに渡す起動計画
#[derive(Debug, Clone, PartialEq)]
pub struct HostPlan {
    pub compose_file: PathBuf,
    /// 依存サービスの compose サービス名
    pub dependency_services: Vec<String>,
    /// サービスの compose サービス名
    pub service_containers: Vec<String>,
    pub processes: Vec<ProcessDefinition>,
    pub proxy: ProxyConfig,
    /// プロキシの HTTPS 終端に使う証明書
    pub certificate: Option<TlsCertificate>,
    /// true の場合、サービスのワークロードは起動しない
    pub start_services_manually: bool,
}

impl HostPlan {
    pub fn from_state(state: &ApplicationState) -> Self {
        let dependency_services = state
            .compose
            .services
            .keys()
            .filter(|name| !state.service_containers.contains(*name))
            .cloned()
            .collect();

        Self {
            compose_file: state.paths.compose_file(),
            dependency_services,
            service_containers: state.service_containers.iter().cloned().collect(),
            processes: state.processes.processes.values().cloned().collect(),
            proxy: state.proxy.clone(),
            certificate: state.certificate.clone(),
            start_services_manually: state.options.start_services_manually,
        }
    }

    pub fn has_containers(&self) -> bool {
        !self.dependency_services.is_empty() || !self.service_containers.is_empty()
    }
}

/// コンテナ・プロセスのライフサイクルを管理するホスト
#[async_trait]
pub trait OrchestrationHost: Send + Sync {
    async fn start(&self, plan: &HostPlan) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}
