//! 開発用TLS証明書
//!
//! ループバック以外のホストをプロキシ経由で公開する場合に、`mkcert` で
//! ワイルドカード証明書を発行します。有効期限は `openssl` で確認します。

use crate::error::{PipelineError, Result};
use crate::state::find_in_path;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use devflow_core::ALLOWED_HOST_PATTERNS;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 期限切れ間近とみなす残り日数
pub const RENEWAL_WINDOW_DAYS: i64 = 30;

/// 残り期間が更新猶予以内か（境界を含む）
pub fn is_expiring_soon(not_after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    not_after - now <= TimeDelta::days(RENEWAL_WINDOW_DAYS)
}

/// `openssl x509 -enddate` の出力をパース
///
/// 例: `notAfter=Jan  5 12:00:00 2027 GMT`
pub fn parse_openssl_enddate(output: &str) -> Option<DateTime<Utc>> {
    let value = output.trim().strip_prefix("notAfter=")?;
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_zone = normalized.strip_suffix(" GMT").unwrap_or(&normalized);

    NaiveDateTime::parse_from_str(without_zone, "%b %d %H:%M:%S %Y")
        .ok()
        .map(|dt| dt.and_utc())
}

/// プロキシが使用する証明書と秘密鍵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCertificate {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// 証明書の発行と有効期限確認
pub struct CertificateManager {
    mkcert: PathBuf,
    openssl: PathBuf,
    cert_file: PathBuf,
    key_file: PathBuf,
}

impl CertificateManager {
    pub fn new(
        mkcert: impl Into<PathBuf>,
        openssl: impl Into<PathBuf>,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mkcert: mkcert.into(),
            openssl: openssl.into(),
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    pub fn cert_file(&self) -> &Path {
        &self.cert_file
    }

    pub fn certificate(&self) -> TlsCertificate {
        TlsCertificate {
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        }
    }

    /// 証明書の有効期限（証明書がなければ None）
    pub async fn expiry(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.cert_file.exists() {
            return Ok(None);
        }

        let openssl = require_tool(&self.openssl, "opensslをインストールしてください")?;
        let output = Command::new(&openssl)
            .args(["x509", "-enddate", "-noout", "-in"])
            .arg(&self.cert_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            // 読めない証明書は再発行対象
            debug!(
                file = %self.cert_file.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Could not read certificate"
            );
            return Ok(None);
        }

        Ok(parse_openssl_enddate(&String::from_utf8_lossy(&output.stdout)))
    }

    /// 必要なら証明書を発行（発行した場合は true）
    pub async fn ensure(&self, now: DateTime<Utc>) -> Result<bool> {
        match self.expiry().await? {
            Some(not_after) if !is_expiring_soon(not_after, now) => {
                debug!(not_after = %not_after, "Certificate is valid");
                return Ok(false);
            }
            Some(not_after) => info!(not_after = %not_after, "Certificate is expiring; renewing"),
            None => info!(file = %self.cert_file.display(), "Certificate not found; generating"),
        }

        self.generate().await?;
        Ok(true)
    }

    async fn generate(&self) -> Result<()> {
        let mkcert = require_tool(
            &self.mkcert,
            "mkcertをインストールし、`mkcert -install` を実行してください",
        )?;

        let mut cmd = Command::new(&mkcert);
        cmd.arg("-cert-file")
            .arg(&self.cert_file)
            .arg("-key-file")
            .arg(&self.key_file)
            .args(ALLOWED_HOST_PATTERNS)
            .args(["localhost", "127.0.0.1", "::1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(PipelineError::precondition(
                format!(
                    "証明書の発行に失敗しました: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                "mkcert -install でローカルCAが登録されているか確認してください",
            ));
        }

        info!(file = %self.cert_file.display(), "Certificate generated");
        Ok(())
    }
}

fn require_tool(tool: &Path, hint: &str) -> Result<PathBuf> {
    find_in_path(tool).ok_or_else(|| {
        PipelineError::precondition(
            format!("コマンドが見つかりません: {}", tool.display()),
            hint,
        )
    })
}
