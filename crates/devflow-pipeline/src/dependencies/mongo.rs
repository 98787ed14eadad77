//! ドキュメントストア（単一ノードのレプリカセット）

use super::{BeforeStartContext, DependencyHandler, MONGO_PORT, ReadinessOutcome, container_name};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use devflow_container::{CONTAINER_HOST_GATEWAY, ComposeService, ContainerExec, image_reference};
use devflow_core::{DependencyType, MongoDependency};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REPLICA_SET: &str = "rs0";
const DEFAULT_VERSION: &str = "7.0";
const DATA_VOLUME: &str = "devflow-mongo-data";

/// レプリカセット状態の確認間隔
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// レプリカセットがプライマリになるまでの待機上限
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(60);

const STATUS_SCRIPT: &str = "try { rs.status().myState } catch (e) { e.codeName }";

/// レプリカセットの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaSetStatus {
    Primary,
    /// 初期化済みだがまだプライマリが選出されていない
    NotPrimary,
    NotInitialized,
    /// サーバーに接続できない
    Unreachable,
}

impl ReplicaSetStatus {
    /// `STATUS_SCRIPT` の出力を分類
    pub fn classify(exit_code: i64, stdout: &str) -> Self {
        let output = stdout.trim();
        if output.contains("NotYetInitialized") {
            return Self::NotInitialized;
        }
        if exit_code != 0 {
            return Self::Unreachable;
        }
        match output.lines().last().map(str::trim) {
            Some("1") => Self::Primary,
            Some(state) if state.parse::<i32>().is_ok() => Self::NotPrimary,
            _ => Self::Unreachable,
        }
    }
}

pub struct MongoHandler {
    config: MongoDependency,
    exec: Arc<dyn ContainerExec>,
}

impl MongoHandler {
    pub fn new(config: MongoDependency, exec: Arc<dyn ContainerExec>) -> Self {
        Self { config, exec }
    }

    fn container(&self) -> String {
        container_name(DependencyType::Mongo)
    }

    async fn status(&self) -> ReplicaSetStatus {
        let port = MONGO_PORT.to_string();
        let cmd = [
            "mongosh",
            "--port",
            port.as_str(),
            "--quiet",
            "--eval",
            STATUS_SCRIPT,
        ];
        match self.exec.exec(&self.container(), &cmd).await {
            Ok(output) => ReplicaSetStatus::classify(output.exit_code, &output.stdout),
            Err(e) => {
                debug!(error = %e, "Replica set status check failed");
                ReplicaSetStatus::Unreachable
            }
        }
    }

    async fn initiate(&self) -> Result<()> {
        let port = MONGO_PORT.to_string();
        let script = format!(
            "rs.initiate({{ _id: '{}', members: [{{ _id: 0, host: 'localhost:{}' }}] }})",
            REPLICA_SET, MONGO_PORT
        );
        let cmd = [
            "mongosh",
            "--port",
            port.as_str(),
            "--quiet",
            "--eval",
            script.as_str(),
        ];
        let output = self.exec.exec(&self.container(), &cmd).await?;
        if !output.success() {
            warn!(
                stdout = %output.stdout.trim(),
                stderr = %output.stderr.trim(),
                "rs.initiate returned a non-zero exit code"
            );
        }
        Ok(())
    }

    /// プライマリになるまで状態を確認し、未初期化なら一度だけ初期化する
    async fn wait_for_primary(&self, token: &CancellationToken) -> Result<()> {
        let mut initiated = false;
        loop {
            let status = self.status().await;
            debug!(status = ?status, "Replica set status");

            match status {
                ReplicaSetStatus::Primary => return Ok(()),
                ReplicaSetStatus::NotInitialized if !initiated => {
                    info!(replica_set = REPLICA_SET, "Initiating replica set");
                    self.initiate().await?;
                    initiated = true;
                }
                _ => {}
            }

            tokio::select! {
                _ = token.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }
}

#[async_trait]
impl DependencyHandler for MongoHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::Mongo
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let image = image_reference("mongo", self.config.version.as_deref(), DEFAULT_VERSION);
        let port = MONGO_PORT.to_string();

        let service = ComposeService::new(image, self.container())
            .command([
                "mongod",
                "--replSet",
                REPLICA_SET,
                "--bind_ip_all",
                "--port",
                port.as_str(),
            ])
            .port(MONGO_PORT, MONGO_PORT)
            .volume(format!("{}:/data/db", DATA_VOLUME));

        ctx.compose.add_service(DependencyType::Mongo.as_str(), service);
        ctx.compose.add_volume(DATA_VOLUME);

        ctx.environment.add_both(
            "ConnectionStrings__Mongo",
            connection_string("localhost"),
            connection_string(CONTAINER_HOST_GATEWAY),
        )?;

        for (index, database) in self.config.databases.iter().enumerate() {
            ctx.environment.add_both(
                format!("Mongo__Databases__{}", index),
                database.clone(),
                database.clone(),
            )?;
        }

        Ok(())
    }

    async fn after_start(&self, token: &CancellationToken) -> Result<ReadinessOutcome> {
        match tokio::time::timeout(READINESS_TIMEOUT, self.wait_for_primary(token)).await {
            Ok(Ok(())) => {
                info!("Mongo replica set is primary");
                Ok(ReadinessOutcome::Ready)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    timeout_secs = READINESS_TIMEOUT.as_secs(),
                    "Mongo replica set did not become primary; continuing in degraded state"
                );
                Ok(ReadinessOutcome::Degraded)
            }
        }
    }
}

fn connection_string(host: &str) -> String {
    format!(
        "mongodb://{}:{}/?replicaSet={}&directConnection=true",
        host, MONGO_PORT, REPLICA_SET
    )
}
