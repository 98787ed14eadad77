//! 依存サービスの起動準備と準備完了確認
//!
//! 種別ごとのハンドラーが compose サービスの追加、接続情報の登録、
//! 起動後の初期化処理（レプリカセット初期化、データベース作成など）を担当します。

mod azurite;
mod eventgrid;
mod keycloak;
mod mongo;
mod postgres;
mod redis;

pub use azurite::AzuriteHandler;
pub use eventgrid::{EventGridHandler, reconcile_settings};
pub use keycloak::KeycloakHandler;
pub use mongo::{MongoHandler, ReplicaSetStatus};
pub use postgres::PostgresHandler;
pub use redis::RedisHandler;

use crate::environment::EnvironmentRegistry;
use crate::error::Result;
use crate::state::GeneratedPaths;
use async_trait::async_trait;
use devflow_container::{ComposeFile, ContainerExec};
use devflow_core::{Dependency, DependencyType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MONGO_PORT: u16 = 27217;
pub const POSTGRES_PORT: u16 = 5432;
pub const REDIS_PORT: u16 = 6379;
pub const EVENTGRID_PORT: u16 = 6500;
pub const AZURITE_PORTS: [u16; 3] = [10000, 10001, 10002];
pub const KEYCLOAK_PORT: u16 = 8180;

/// 準備完了確認の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready,
    /// タイムアウトしたが実行は継続する
    Degraded,
}

/// before_start に渡される書き込み先
pub struct BeforeStartContext<'a> {
    pub compose: &'a mut ComposeFile,
    pub environment: &'a mut EnvironmentRegistry,
    pub paths: &'a GeneratedPaths,
    pub token: &'a CancellationToken,
}

/// 依存サービス種別ごとのハンドラー
#[async_trait]
pub trait DependencyHandler: Send + Sync {
    fn dependency_type(&self) -> DependencyType;

    /// compose サービスの追加と接続情報の登録
    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()>;

    /// コンテナ起動後の準備完了確認
    async fn after_start(&self, _token: &CancellationToken) -> Result<ReadinessOutcome> {
        Ok(ReadinessOutcome::Ready)
    }

    /// ファイル監視などのリソースを解放
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// 依存サービスが使用する固定ホストポート
pub fn fixed_ports(dependency_type: DependencyType) -> &'static [u16] {
    match dependency_type {
        DependencyType::Mongo => &[MONGO_PORT],
        DependencyType::Postgres => &[POSTGRES_PORT],
        DependencyType::Redis => &[REDIS_PORT],
        DependencyType::EventGrid => &[EVENTGRID_PORT],
        DependencyType::Azurite => &AZURITE_PORTS,
        DependencyType::Keycloak => &[KEYCLOAK_PORT],
    }
}

/// 依存サービスのコンテナ名
pub fn container_name(dependency_type: DependencyType) -> String {
    format!("devflow-{}", dependency_type)
}

/// 依存サービス定義に対応するハンドラーを生成
pub fn create_handler(
    dependency: &Dependency,
    exec: Arc<dyn ContainerExec>,
) -> Arc<dyn DependencyHandler> {
    match dependency {
        Dependency::Mongo(config) => Arc::new(MongoHandler::new(config.clone(), exec)),
        Dependency::Postgres(config) => Arc::new(PostgresHandler::new(config.clone(), exec)),
        Dependency::Redis(config) => Arc::new(RedisHandler::new(config.clone())),
        Dependency::EventGrid(config) => Arc::new(EventGridHandler::new(config.clone())),
        Dependency::Azurite(config) => Arc::new(AzuriteHandler::new(config.clone())),
        Dependency::Keycloak(config) => Arc::new(KeycloakHandler::new(config.clone(), exec)),
    }
}
