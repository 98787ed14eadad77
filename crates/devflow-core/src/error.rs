use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("YAMLパースエラー: {path}\n理由: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error(
        "設定ファイルが見つかりません\n探索位置: {0}\nヒント: devflow.yaml または devflow.yml を含むディレクトリで実行するか、-f でファイルを指定してください"
    )]
    NoConfiguration(PathBuf),

    #[error(
        "指定された設定ファイルをいずれも読み込めませんでした: {}\nヒント: パスと YAML の形式を確認してください（詳細はログを確認してください）",
        display_paths(.0)
    )]
    NoReadableConfiguration(Vec<PathBuf>),

    #[error(
        "サービス名 '{0}' は無効です\nヒント: 英字で始まり、英数字とハイフンのみ（連続・末尾のハイフン不可、64文字以内）を使用してください"
    )]
    InvalidServiceName(String),

    #[error("サービス '{service}' のホスト '{host}' は許可されていません\n許可されたパターン: {allowed}")]
    InvalidHost {
        service: String,
        host: String,
        allowed: String,
    },

    #[error("サービス '{service}' のポート {port} は無効です（1-65535）")]
    InvalidPort { service: String, port: u32 },

    #[error("サービス '{0}' に runner が定義されていません")]
    MissingRunner(String),

    #[error("サービス '{service}' の runner 種別 '{kind}' は未対応です")]
    UnknownRunnerType { service: String, kind: String },

    #[error("サービス '{service}' の {runner} runner に '{field}' が指定されていません")]
    MissingField {
        service: String,
        runner: &'static str,
        field: &'static str,
    },

    #[error("サービス '{service}' が参照するパスが存在しません: {path}")]
    PathNotFound { service: String, path: PathBuf },

    #[error("サービス '{name}' は既に {first} で定義されています（重複: {second}）")]
    DuplicateService {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("未知の依存サービス種別です: {0}")]
    UnknownDependencyType(String),

    #[error("サービス '{0}' の ingress は既に解決済みです")]
    IngressAlreadyResolved(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, FlowError>;
