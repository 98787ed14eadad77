//! 環境変数レジストリ
//!
//! 依存サービスやサービスが公開する接続情報（接続文字列、ベースURLなど）を
//! 実行中に集約し、生成ファイルへ書き出す前に確定させます。

use crate::error::{PipelineError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// 階層化された設定キーの区切り（`A__B__C` は設定パス `A:B:C` に対応）
pub const KEY_SEPARATOR: &str = "__";

/// 変数の適用範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scope {
    /// ホスト上で直接動くワークロード
    Host,
    /// コンテナ内で動くワークロード
    Container,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Host => f.write_str("host"),
            Scope::Container => f.write_str("container"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    pub scope: Scope,
}

/// 追記専用の環境変数レジストリ
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    entries: Vec<EnvironmentVariable>,
    frozen: bool,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        scope: Scope,
    ) -> Result<()> {
        let name = name.into();
        if self.frozen {
            return Err(PipelineError::RegistryFrozen(name));
        }

        debug!(name = %name, scope = %scope, "Environment variable registered");
        self.entries.push(EnvironmentVariable {
            name,
            value: value.into(),
            scope,
        });
        Ok(())
    }

    /// ホスト向け・コンテナ向けの値を同時に登録
    pub fn add_both(
        &mut self,
        name: impl Into<String>,
        host: impl Into<String>,
        container: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        self.add(name.clone(), host, Scope::Host)?;
        self.add(name, container, Scope::Container)
    }

    /// 以降の追加を禁止し、登録順のエントリを返す
    pub fn freeze(&mut self) -> &[EnvironmentVariable] {
        self.frozen = true;
        &self.entries
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn entries(&self) -> &[EnvironmentVariable] {
        &self.entries
    }

    /// 指定スコープの変数を解決（同名は後勝ち）
    pub fn resolve(&self, scope: Scope) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter(|e| e.scope == scope)
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }
}

/// `__` 区切りの変数名をネストしたJSONオブジェクトに変換
///
/// 同じ位置に値とオブジェクトが衝突した場合はオブジェクトを優先します。
pub fn to_settings_tree(vars: &BTreeMap<String, String>) -> Value {
    let mut root = Map::new();

    'vars: for (name, value) in vars {
        let segments: Vec<&str> = name
            .split(KEY_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        let Some((leaf, parents)) = segments.split_last() else {
            continue;
        };

        let mut node = &mut root;
        for segment in parents {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                debug!(key = %segment, "Replacing scalar setting with nested object");
                *child = Value::Object(Map::new());
            }
            node = match child.as_object_mut() {
                Some(map) => map,
                None => continue 'vars,
            };
        }

        match node.get(*leaf) {
            Some(Value::Object(_)) => {
                debug!(key = %name, "Nested object already present, skipping scalar");
            }
            _ => {
                node.insert(leaf.to_string(), Value::String(value.clone()));
            }
        }
    }

    Value::Object(root)
}
