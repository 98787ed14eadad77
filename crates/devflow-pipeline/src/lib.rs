//! devflow のオーケストレーションパイプライン
//!
//! 設定の読み込みから依存サービスの準備、サービスの解決、生成ファイルの書き出し、
//! ホストへの引き渡し、終了時の後始末までをステップとして実行します。

pub mod certificates;
pub mod dependencies;
pub mod engine;
pub mod environment;
pub mod error;
pub mod host;
pub mod proxy;
pub mod services;
pub mod state;
pub mod steps;

pub use certificates::TlsCertificate;
pub use engine::{Pipeline, PipelineState, PipelineStep};
pub use environment::{EnvironmentRegistry, EnvironmentVariable, Scope};
pub use error::{PipelineError, Result};
pub use host::{HostPlan, OrchestrationHost};
pub use proxy::ProxyConfig;
pub use state::{ApplicationState, GeneratedPaths, RunOptions, ToolPaths};

use devflow_container::ContainerExec;
use std::sync::Arc;
use steps::*;

/// `devflow run` の標準パイプライン
pub fn standard_pipeline(
    exec: Arc<dyn ContainerExec>,
    host: Arc<dyn OrchestrationHost>,
) -> Pipeline {
    Pipeline::new()
        .step(EnsureDockerStep::new(Arc::clone(&exec)))
        .step(PrepareGeneratedDirectoryStep)
        .step(LoadConfigurationStep)
        .step(ApplyPreferencesStep)
        .step(EnsureCertificateStep)
        .step(ReservePortsStep)
        .step(BeforeStartDependenciesStep::new(exec))
        .step(ResolveServicesStep)
        .step(ConfigureReverseProxyStep)
        .step(WriteArtifactsStep)
        .step(StartHostStep::new(host))
        .step(AfterStartDependenciesStep)
        .step(WaitForShutdownStep)
}
