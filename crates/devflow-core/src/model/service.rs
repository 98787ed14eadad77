//! サービス定義

use super::document::ServiceDefinition;
use super::ingress::{Ingress, IngressConfig, is_loopback_host, normalize_path};
use super::runner::{Runner, RunnerKind, RunnerTarget};
use crate::error::{FlowError, Result};
use crate::validation::{validate_host, validate_service_name};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// サービス名のキー（大文字小文字を区別しない）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn new(name: &str) -> Self {
        Self(name.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// サービス定義（検証済み）
///
/// `runners` は空でないことが保証されます。先頭が既定のrunnerで、
/// `preferred_runner` が宣言済みのrunnerを指す場合のみそちらが優先されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub name: String,
    /// 宣言元ファイルのパスから決定的に生成されるコンテナ名
    pub container_name: String,
    /// 宣言元ファイル
    pub source: PathBuf,
    pub runners: Vec<Runner>,
    pub ingress_config: IngressConfig,
    pub env: BTreeMap<String, String>,
    /// ユーザーが外部から指定する優先runner
    pub preferred_runner: Option<RunnerKind>,
    /// `--remote-env` で選択された remote runner の環境名
    pub remote_environment: Option<String>,
    ingress: Option<Ingress>,
}

impl Service {
    /// 生の定義から検証済みサービスを生成
    pub fn from_definition(name: &str, def: ServiceDefinition, source: &Path) -> Result<Self> {
        if !validate_service_name(name) {
            return Err(FlowError::InvalidServiceName(name.to_string()));
        }

        if let Some(host) = def.ingress.host.as_deref() {
            validate_host(name, host)?;
        }

        if let Some(port) = def.ingress.port
            && !(1..=u16::MAX as u32).contains(&port)
        {
            return Err(FlowError::InvalidPort {
                service: name.to_string(),
                port,
            });
        }

        if def.runners.is_empty() {
            return Err(FlowError::MissingRunner(name.to_string()));
        }

        let base_dir = source.parent().unwrap_or(Path::new("."));
        let runners = def
            .runners
            .into_iter()
            .map(|r| Runner::from_definition(name, r, base_dir))
            .collect::<Result<Vec<_>>>()?;

        if runners.len() > 1 {
            let ignored: Vec<&str> = runners[1..].iter().map(|r| r.kind().as_str()).collect();
            info!(
                service = name,
                active = runners[0].kind().as_str(),
                ignored = ?ignored,
                "Service declares multiple runners; only the first is used unless another is preferred"
            );
        }

        Ok(Self {
            name: name.to_string(),
            container_name: container_name_for(name, source),
            source: source.to_path_buf(),
            runners,
            ingress_config: def.ingress,
            env: def.env,
            preferred_runner: None,
            remote_environment: None,
            ingress: None,
        })
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.name)
    }

    /// 実際に使用するrunner
    pub fn active_runner(&self) -> &Runner {
        let Some(kind) = self.preferred_runner else {
            return &self.runners[0];
        };

        let environment = self.remote_environment.as_deref();
        self.runners
            .iter()
            .filter(|r| r.kind() == kind)
            .find(|r| match (&r.target, environment) {
                (RunnerTarget::Remote { environment: declared, .. }, Some(selected)) => declared
                    .as_deref()
                    .is_some_and(|d| d.eq_ignore_ascii_case(selected)),
                _ => true,
            })
            .unwrap_or(&self.runners[0])
    }

    /// 指定環境名を持つ remote runner を優先する
    ///
    /// 該当する runner が宣言されていなければ何もせず false を返します。
    pub fn select_remote_environment(&mut self, environment: &str) -> bool {
        let declared = self.runners.iter().any(|r| {
            matches!(
                &r.target,
                RunnerTarget::Remote { environment: Some(e), .. } if e.eq_ignore_ascii_case(environment)
            )
        });
        if declared {
            self.preferred_runner = Some(RunnerKind::Remote);
            self.remote_environment = Some(environment.to_string());
        }
        declared
    }

    /// 指定種別のrunnerが宣言されているか
    pub fn declares_runner(&self, kind: RunnerKind) -> bool {
        self.runners.iter().any(|r| r.kind() == kind)
    }

    /// ホストがループバック以外で宣言されているか
    pub fn has_public_host(&self) -> bool {
        self.ingress_config
            .host
            .as_deref()
            .is_some_and(|h| !is_loopback_host(h))
    }

    pub fn declared_path(&self) -> String {
        normalize_path(self.ingress_config.path.as_deref())
    }

    pub fn ingress(&self) -> Option<&Ingress> {
        self.ingress.as_ref()
    }

    /// 解決済みingressを設定（一度だけ）
    pub fn set_ingress(&mut self, ingress: Ingress) -> Result<()> {
        if self.ingress.is_some() {
            return Err(FlowError::IngressAlreadyResolved(self.name.clone()));
        }
        self.ingress = Some(ingress);
        Ok(())
    }
}

/// 宣言元ファイルのパスからコンテナ名を生成
///
/// 同じファイルから起動する限り、再起動をまたいで同じ名前になります。
pub fn container_name_for(name: &str, source: &Path) -> String {
    let canonical = source
        .canonicalize()
        .unwrap_or_else(|_| source.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let hash = hex::encode(digest);
    format!("{}-{}", name.to_ascii_lowercase(), &hash[..8])
}
