//! docker compose 定義の生成

use crate::error::Result;
use devflow_core::VolumeMount;
use serde::Serialize;
use std::collections::BTreeMap;

/// コンテナからホストへ到達するためのホスト名
pub const CONTAINER_HOST_GATEWAY: &str = "host.docker.internal";

/// docker compose ファイル
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeFile {
    pub name: Option<String>,
    pub services: BTreeMap<String, ComposeService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, ComposeVolume>,
}

/// 名前付きボリューム
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeVolume {}

/// compose のサービス定義
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ComposeFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// サービスを追加（同名のサービスは置き換え）
    pub fn add_service(&mut self, name: impl Into<String>, service: ComposeService) {
        self.services.insert(name.into(), service);
    }

    pub fn add_volume(&mut self, name: impl Into<String>) {
        self.volumes.insert(name.into(), ComposeVolume::default());
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl ComposeService {
    /// イメージとコンテナ名を指定して生成
    ///
    /// ホストへ到達できるよう `host.docker.internal` を常に解決可能にします。
    pub fn new(image: impl Into<String>, container_name: impl Into<String>) -> Self {
        let container_name = container_name.into();
        let mut labels = BTreeMap::new();
        labels.insert("devflow.resource".to_string(), container_name.clone());

        Self {
            image: image.into(),
            container_name,
            extra_hosts: vec![format!("{}:host-gateway", CONTAINER_HOST_GATEWAY)],
            labels,
            ..Default::default()
        }
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn port(mut self, host: u16, container: u16) -> Self {
        self.ports.push(port_mapping(host, container));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.environment.extend(vars);
        self
    }

    pub fn volume(mut self, spec: impl Into<String>) -> Self {
        self.volumes.push(spec.into());
        self
    }
}

/// イメージ名を決定
///
/// - タグ付きのイメージ名はそのまま使用
/// - バージョン指定があれば `image:version`
/// - どちらもなければ `image:default_tag`
pub fn image_reference(image: &str, version: Option<&str>, default_tag: &str) -> String {
    match version {
        Some(ver) => format!("{}:{}", image, ver),
        None if image.rsplit('/').next().is_some_and(|last| last.contains(':')) => {
            image.to_string()
        }
        None => format!("{}:{}", image, default_tag),
    }
}

/// `host:container` 形式のポートマッピング
pub fn port_mapping(host: u16, container: u16) -> String {
    format!("{}:{}", host, container)
}

/// bind mount の指定文字列
pub fn bind_mount(volume: &VolumeMount) -> String {
    let mode = if volume.read_only { "ro" } else { "rw" };
    format!(
        "{}:{}:{}",
        volume.host.display(),
        volume.container,
        mode
    )
}
