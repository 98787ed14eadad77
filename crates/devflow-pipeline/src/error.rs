use devflow_config::ConfigError;
use devflow_container::ContainerError;
use devflow_core::FlowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("設定エラー: {0}")]
    UserConfiguration(String),

    #[error("実行環境の前提条件を満たしていません: {message}\nヒント: {hint}")]
    EnvironmentPrecondition { message: String, hint: String },

    #[error("依存サービス '{dependency}' が一時的に利用できません: {message}")]
    TransientDependency { dependency: String, message: String },

    #[error("キャンセルされました")]
    Cancelled,

    #[error("環境変数レジストリは確定済みのため '{0}' を追加できません")]
    RegistryFrozen(String),

    #[error("ステップ '{step}' の停止処理に失敗しました: {source}")]
    StopFailed {
        step: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{} 件の停止処理に失敗しました:\n{}", .0.len(), format_errors(.0))]
    StopFailedMany(Vec<PipelineError>),

    #[error("{start}\nさらに {} 件の停止処理に失敗しました:\n{}", .stops.len(), format_errors(.stops))]
    Failed {
        start: Box<PipelineError>,
        stops: Vec<PipelineError>,
    },

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn precondition(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::EnvironmentPrecondition {
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn transient(dependency: impl Into<String>, message: impl ToString) -> Self {
        Self::TransientDependency {
            dependency: dependency.into(),
            message: message.to_string(),
        }
    }
}

impl From<FlowError> for PipelineError {
    fn from(err: FlowError) -> Self {
        PipelineError::UserConfiguration(err.to_string())
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(e) => PipelineError::Unhandled(e.into()),
            other => PipelineError::UserConfiguration(other.to_string()),
        }
    }
}

impl From<ContainerError> for PipelineError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::DockerConnectionFailed(message) => PipelineError::precondition(
                format!("Dockerに接続できません: {}", message),
                "Dockerが起動しているか確認してください",
            ),
            ContainerError::PortOutOfRange(_) | ContainerError::PortAlreadyReserved(_) => {
                PipelineError::UserConfiguration(err.to_string())
            }
            ContainerError::ReadinessTimeout { ref target, .. }
            | ContainerError::ExecFailed {
                container: ref target,
                ..
            } => PipelineError::transient(target.clone(), &err),
            other => PipelineError::Unhandled(other.into()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Unhandled(err.into())
    }
}

fn format_errors(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(|e| format!("  • {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, PipelineError>;
