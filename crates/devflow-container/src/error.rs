use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • OrbStackまたはDocker Desktopがインストールされているか確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("コンテナ '{container}' でのコマンド実行に失敗しました: {message}")]
    ExecFailed { container: String, message: String },

    #[error("ポート {0} は範囲外です（1-65535）")]
    PortOutOfRange(u32),

    #[error(
        "ポート {0} は既に予約されています\n\nヒント:\n  • 別のポート番号を使用するか、ポート指定を省略してください"
    )]
    PortAlreadyReserved(u16),

    #[error("空きポートを割り当てられませんでした: {0}")]
    PortAllocationFailed(String),

    #[error(
        "'{target}' の準備完了を待機中にタイムアウトしました（{max_retries}回リトライ）\n\nヒント:\n  • 依存サービスが正常に起動しているか確認してください"
    )]
    ReadinessTimeout { target: String, max_retries: u32 },

    #[error("生成ファイルのシリアライズに失敗しました: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("プロセスの起動に失敗しました: {command}\n理由: {message}")]
    ProcessSpawnFailed { command: String, message: String },
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError { .. } => {
                ContainerError::DockerApiError(err.to_string())
            }
            _ => {
                // 接続エラーの可能性をチェック
                let err_str = err.to_string();
                if err_str.contains("Connection refused")
                    || err_str.contains("No such file or directory")
                {
                    ContainerError::DockerConnectionFailed(err_str)
                } else {
                    ContainerError::DockerApiError(err_str)
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
