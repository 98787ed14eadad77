//! サービス名・ホスト名の検証

use crate::error::{FlowError, Result};
use crate::model::is_loopback_host;
use regex::Regex;
use std::sync::LazyLock;

/// サービス名の最大長
pub const MAX_SERVICE_NAME_LEN: usize = 64;

/// プロキシ経由で公開できるワイルドカードドメイン
///
/// `*` はちょうど1つのDNSラベルにマッチします。
pub const ALLOWED_HOST_PATTERNS: &[&str] = &["*.devflow.localhost", "*.localtest.me"];

const LABEL: &str = "[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?";

static HOST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ALLOWED_HOST_PATTERNS
        .iter()
        .filter_map(|pattern| {
            let suffix = pattern.trim_start_matches("*.");
            let source = format!("(?i)^{}\\.{}$", LABEL, regex::escape(suffix));
            Regex::new(&source).ok()
        })
        .collect()
});

/// サービス名が識別子文法に従っているか
///
/// 英字で始まり、英数字とハイフンのみ。連続・末尾のハイフンは不可、1〜64文字。
pub fn validate_service_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
        return false;
    }

    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphabetic() || bytes[bytes.len() - 1] == b'-' {
        return false;
    }

    if name.contains("--") {
        return false;
    }

    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// 許可されたワイルドカードドメインにマッチするか
pub fn matches_allowed_host(host: &str) -> bool {
    HOST_PATTERNS.iter().any(|re| re.is_match(host))
}

/// ingressホストを検証
pub fn validate_host(service: &str, host: &str) -> Result<()> {
    if is_loopback_host(host) || matches_allowed_host(host) {
        return Ok(());
    }

    Err(FlowError::InvalidHost {
        service: service.to_string(),
        host: host.to_string(),
        allowed: ALLOWED_HOST_PATTERNS.join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_service_names() {
        assert!(validate_service_name("web-api"));
        assert!(validate_service_name("a"));
        assert!(validate_service_name("Api2"));
        assert!(validate_service_name(&"a".repeat(64)));
    }

    #[test]
    fn test_invalid_service_names() {
        assert!(!validate_service_name(""));
        assert!(!validate_service_name("-abc"));
        assert!(!validate_service_name("abc-"));
        assert!(!validate_service_name("ab--c"));
        assert!(!validate_service_name("1api"));
        assert!(!validate_service_name("api_v2"));
        assert!(!validate_service_name("api.v2"));
        assert!(!validate_service_name(&"a".repeat(65)));
    }

    #[test]
    fn test_allowed_hosts() {
        assert!(validate_host("api", "api.devflow.localhost").is_ok());
        assert!(validate_host("api", "API.DevFlow.Localhost").is_ok());
        assert!(validate_host("api", "my-app.localtest.me").is_ok());
        assert!(validate_host("api", "localhost").is_ok());
        assert!(validate_host("api", "127.0.0.1").is_ok());
    }

    #[test]
    fn test_rejected_hosts() {
        for host in [
            "devflow.localhost",
            "a.b.devflow.localhost",
            "api.example.com",
            "api.devflow.localhost.evil.com",
            "-api.localtest.me",
            "api-.localtest.me",
            "api_1.localtest.me",
            "",
        ] {
            assert!(
                matches!(
                    validate_host("api", host),
                    Err(FlowError::InvalidHost { .. })
                ),
                "host should be rejected: {}",
                host
            );
        }
    }

    #[test]
    fn test_invalid_host_lists_patterns() {
        match validate_host("api", "example.com") {
            Err(FlowError::InvalidHost { allowed, .. }) => {
                assert!(allowed.contains("*.devflow.localhost"));
                assert!(allowed.contains("*.localtest.me"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
