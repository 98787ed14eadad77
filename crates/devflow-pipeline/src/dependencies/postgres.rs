//! リレーショナルストア

use super::{
    BeforeStartContext, DependencyHandler, POSTGRES_PORT, ReadinessOutcome, container_name,
};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use devflow_container::{
    CONTAINER_HOST_GATEWAY, ComposeService, ContainerExec, WaitConfig, image_reference, wait_until,
};
use devflow_core::{DependencyType, PostgresDependency};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_VERSION: &str = "16";
const USER: &str = "postgres";
const PASSWORD: &str = "devflow";
const DATA_VOLUME: &str = "devflow-postgres-data";

pub struct PostgresHandler {
    config: PostgresDependency,
    exec: Arc<dyn ContainerExec>,
    wait: WaitConfig,
}

impl PostgresHandler {
    pub fn new(config: PostgresDependency, exec: Arc<dyn ContainerExec>) -> Self {
        Self {
            config,
            exec,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    fn container(&self) -> String {
        container_name(DependencyType::Postgres)
    }

    async fn is_ready(&self) -> devflow_container::Result<bool> {
        let output = self
            .exec
            .exec(&self.container(), &["pg_isready", "-U", USER])
            .await?;
        Ok(output.success())
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        let query = format!(
            "SELECT 1 FROM pg_database WHERE datname = '{}'",
            database.replace('\'', "''")
        );
        let output = self
            .exec
            .exec(&self.container(), &["psql", "-U", USER, "-tAc", query.as_str()])
            .await?;
        Ok(output.success() && output.stdout.trim() == "1")
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        let statement = format!("CREATE DATABASE \"{}\"", database.replace('"', "\"\""));
        let output = self
            .exec
            .exec(&self.container(), &["psql", "-U", USER, "-c", statement.as_str()])
            .await?;

        if !output.success() {
            return Err(PipelineError::transient(
                DependencyType::Postgres.as_str(),
                format!(
                    "データベース '{}' の作成に失敗しました: {}",
                    database,
                    output.stderr.trim()
                ),
            ));
        }

        info!(database, "Database created");
        Ok(())
    }
}

#[async_trait]
impl DependencyHandler for PostgresHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::Postgres
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let image = image_reference("postgres", self.config.version.as_deref(), DEFAULT_VERSION);

        let service = ComposeService::new(image, self.container())
            .port(POSTGRES_PORT, 5432)
            .env("POSTGRES_USER", USER)
            .env("POSTGRES_PASSWORD", PASSWORD)
            .volume(format!("{}:/var/lib/postgresql/data", DATA_VOLUME));

        ctx.compose
            .add_service(DependencyType::Postgres.as_str(), service);
        ctx.compose.add_volume(DATA_VOLUME);

        ctx.environment.add_both(
            "ConnectionStrings__Postgres",
            connection_string("localhost"),
            connection_string(CONTAINER_HOST_GATEWAY),
        )?;

        Ok(())
    }

    async fn after_start(&self, token: &CancellationToken) -> Result<ReadinessOutcome> {
        let ready = tokio::select! {
            _ = token.cancelled() => return Err(PipelineError::Cancelled),
            result = wait_until("postgres", &self.wait, || self.is_ready()) => result,
        };

        if let Err(e) = ready {
            warn!(error = %e, "Postgres did not become ready; continuing in degraded state");
            return Ok(ReadinessOutcome::Degraded);
        }

        for database in &self.config.databases {
            if !self.database_exists(database).await? {
                self.create_database(database).await?;
            }
        }

        Ok(ReadinessOutcome::Ready)
    }
}

fn connection_string(host: &str) -> String {
    format!(
        "Host={};Port={};Username={};Password={}",
        host, POSTGRES_PORT, USER, PASSWORD
    )
}
