//! 依存サービス定義（データストア・エミュレーター）

use crate::error::{FlowError, Result};
use crate::merge::{Merge, first_non_null, union_ignore_case, union_topics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// 依存サービス種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Mongo,
    Postgres,
    Redis,
    EventGrid,
    Azurite,
    Keycloak,
}

impl DependencyType {
    /// 文字列からパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Some(Self::Mongo),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "redis" => Some(Self::Redis),
            "eventgrid" => Some(Self::EventGrid),
            "azurite" => Some(Self::Azurite),
            "keycloak" => Some(Self::Keycloak),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mongo => "mongo",
            Self::Postgres => "postgres",
            Self::Redis => "redis",
            Self::EventGrid => "eventgrid",
            Self::Azurite => "azurite",
            Self::Keycloak => "keycloak",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ドキュメントストア（単一ノードのレプリカセット）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDependency {
    pub version: Option<String>,
    #[serde(default)]
    pub databases: Vec<String>,
}

/// リレーショナルストア
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresDependency {
    pub version: Option<String>,
    #[serde(default)]
    pub databases: Vec<String>,
}

/// キャッシュ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisDependency {
    pub version: Option<String>,
}

/// Pub/Subエミュレーター
///
/// YAML形式：
/// ```yaml
/// - type: eventgrid
///   topics:
///     orders:
///       - http://localhost:5000/events
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGridDependency {
    /// トピック名 → サブスクリプション（配信先URL）
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<String>>,
}

/// ストレージエミュレーター
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzuriteDependency {
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub queues: Vec<String>,
}

/// 認証エミュレーター
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeycloakDependency {
    pub version: Option<String>,
    #[serde(default)]
    pub realms: Vec<String>,
}

impl Merge for MongoDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            version: first_non_null(self.version, other.version),
            databases: union_ignore_case(self.databases, other.databases),
        }
    }
}

impl Merge for PostgresDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            version: first_non_null(self.version, other.version),
            databases: union_ignore_case(self.databases, other.databases),
        }
    }
}

impl Merge for RedisDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            version: first_non_null(self.version, other.version),
        }
    }
}

impl Merge for EventGridDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            topics: union_topics(self.topics, other.topics),
        }
    }
}

impl Merge for AzuriteDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            containers: union_ignore_case(self.containers, other.containers),
            tables: union_ignore_case(self.tables, other.tables),
            queues: union_ignore_case(self.queues, other.queues),
        }
    }
}

impl Merge for KeycloakDependency {
    fn merge(self, other: Self) -> Self {
        Self {
            version: first_non_null(self.version, other.version),
            realms: union_ignore_case(self.realms, other.realms),
        }
    }
}

/// 依存サービス
///
/// 1回の実行で種別ごとに論理的なインスタンスは1つなので、等価性は種別のみで判定します。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Dependency {
    Mongo(MongoDependency),
    Postgres(PostgresDependency),
    Redis(RedisDependency),
    EventGrid(EventGridDependency),
    Azurite(AzuriteDependency),
    Keycloak(KeycloakDependency),
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.dependency_type() == other.dependency_type()
    }
}

impl Eq for Dependency {}

impl Dependency {
    pub fn dependency_type(&self) -> DependencyType {
        match self {
            Self::Mongo(_) => DependencyType::Mongo,
            Self::Postgres(_) => DependencyType::Postgres,
            Self::Redis(_) => DependencyType::Redis,
            Self::EventGrid(_) => DependencyType::EventGrid,
            Self::Azurite(_) => DependencyType::Azurite,
            Self::Keycloak(_) => DependencyType::Keycloak,
        }
    }

    /// `type` フィールドで判別してYAMLブロックをパース
    ///
    /// 未知の種別は致命的エラー、既知の種別でペイロードが不正な場合は YAML エラーを返します。
    pub fn from_value(value: serde_yaml::Value) -> Result<Self> {
        let type_name = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let dependency_type = DependencyType::parse(&type_name)
            .ok_or_else(|| FlowError::UnknownDependencyType(type_name.clone()))?;

        let yaml = |source| FlowError::Yaml {
            path: format!("dependencies[type={}]", type_name).into(),
            source,
        };

        let dependency = match dependency_type {
            DependencyType::Mongo => Self::Mongo(serde_yaml::from_value(value).map_err(yaml)?),
            DependencyType::Postgres => {
                Self::Postgres(serde_yaml::from_value(value).map_err(yaml)?)
            }
            DependencyType::Redis => Self::Redis(serde_yaml::from_value(value).map_err(yaml)?),
            DependencyType::EventGrid => {
                Self::EventGrid(serde_yaml::from_value(value).map_err(yaml)?)
            }
            DependencyType::Azurite => Self::Azurite(serde_yaml::from_value(value).map_err(yaml)?),
            DependencyType::Keycloak => {
                Self::Keycloak(serde_yaml::from_value(value).map_err(yaml)?)
            }
        };

        Ok(dependency)
    }

    /// 同じ種別の依存サービスをマージ（左優先）
    pub fn merge(self, other: Dependency) -> Dependency {
        match (self, other) {
            (Self::Mongo(a), Self::Mongo(b)) => Self::Mongo(a.merge(b)),
            (Self::Postgres(a), Self::Postgres(b)) => Self::Postgres(a.merge(b)),
            (Self::Redis(a), Self::Redis(b)) => Self::Redis(a.merge(b)),
            (Self::EventGrid(a), Self::EventGrid(b)) => Self::EventGrid(a.merge(b)),
            (Self::Azurite(a), Self::Azurite(b)) => Self::Azurite(a.merge(b)),
            (Self::Keycloak(a), Self::Keycloak(b)) => Self::Keycloak(a.merge(b)),
            (left, right) => {
                warn!(
                    left = %left.dependency_type(),
                    right = %right.dependency_type(),
                    "Refusing to merge dependencies of different types"
                );
                left
            }
        }
    }
}
