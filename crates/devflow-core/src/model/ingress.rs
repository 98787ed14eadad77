//! Ingress定義

use serde::{Deserialize, Serialize};

/// ループバックとして扱うホスト名（未指定時のデフォルト）
pub const LOOPBACK_HOST: &str = "localhost";

/// ルートパス
pub const ROOT_PATH: &str = "/";

/// 設定ファイルに記述された ingress
///
/// YAML形式：
/// ```yaml
/// ingress:
///   host: api.devflow.localhost
///   port: 5000
///   path: /api/
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressConfig {
    pub host: Option<String>,
    /// 範囲外の値を検出できるよう u32 で受ける
    pub port: Option<u32>,
    pub path: Option<String>,
}

/// 実行時に解決された ingress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub host: String,
    /// ワークロードが実際に listen するポート
    pub internal_port: u16,
    /// リバースプロキシが listen するポート（ホストがループバックでない場合のみ）
    pub external_port: Option<u16>,
    pub path: String,
}

impl Ingress {
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }
}

/// ループバックホストかどうか
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim();
    host.eq_ignore_ascii_case(LOOPBACK_HOST) || host == "127.0.0.1" || host == "::1"
}

/// パスを正規化（先頭スラッシュを補完、空ならルート）
pub fn normalize_path(path: Option<&str>) -> String {
    match path.map(str::trim) {
        None | Some("") => ROOT_PATH.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => format!("/{}", p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_loopback_host() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("LocalHost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(!is_loopback_host("api.devflow.localhost"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(None), "/");
        assert_eq!(normalize_path(Some("")), "/");
        assert_eq!(normalize_path(Some("api/")), "/api/");
        assert_eq!(normalize_path(Some("/api")), "/api");
    }
}
