use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません\nヒント: DEVFLOW_HOME 環境変数で設定ディレクトリを指定できます")]
    ConfigDirNotFound,

    #[error("ホームディレクトリが見つかりません")]
    HomeDirNotFound,

    #[error("設定ファイルの形式が不正です: {path}\n理由: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
