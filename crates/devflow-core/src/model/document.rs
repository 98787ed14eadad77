//! 設定ファイルの生の表現
//!
//! サービスと依存サービスは個別に検証するため、ここでは `serde_yaml::Value` のまま保持します。
//! 1つの不正なサービス定義がファイル全体の読み込みを失敗させないようにするためです。

use super::ingress::IngressConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 設定ファイル1つ分
///
/// YAML形式：
/// ```yaml
/// services:
///   web-api:
///     ingress: { host: api.devflow.localhost }
///     runners:
///       - type: executable
///         command: npm
///         args: [start]
/// dependencies:
///   - type: mongo
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub services: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub dependencies: Vec<serde_yaml::Value>,
}

/// サービス定義（未検証）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub runners: Vec<RunnerDefinition>,
}

/// Runner定義（未検証）
///
/// 種別ごとの必須フィールドは `Runner::from_definition` で検証します。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub port: Option<u32>,
    pub protocol: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    // executable
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,

    // docker
    pub image: Option<String>,
    pub container_port: Option<u32>,
    #[serde(default)]
    pub volumes: Vec<VolumeDefinition>,

    // dotnet
    pub project: Option<PathBuf>,
    pub watch: Option<bool>,

    // openapi
    pub spec: Option<String>,

    // remote
    pub url: Option<String>,
    pub environment: Option<String>,
}

/// ボリューム定義（未検証）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDefinition {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub read_only: bool,
}
