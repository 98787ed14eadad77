//! 認証エミュレーター

use super::{BeforeStartContext, DependencyHandler, KEYCLOAK_PORT, ReadinessOutcome, container_name};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use devflow_container::{
    CONTAINER_HOST_GATEWAY, ComposeService, ContainerExec, WaitConfig, image_reference, wait_until,
};
use devflow_core::{DependencyType, KeycloakDependency};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_VERSION: &str = "26.0";
const ADMIN_USER: &str = "admin";
const ADMIN_PASSWORD: &str = "admin";
const DEFAULT_REALM: &str = "master";
const KCADM: &str = "/opt/keycloak/bin/kcadm.sh";

pub struct KeycloakHandler {
    config: KeycloakDependency,
    exec: Arc<dyn ContainerExec>,
    wait: WaitConfig,
}

impl KeycloakHandler {
    pub fn new(config: KeycloakDependency, exec: Arc<dyn ContainerExec>) -> Self {
        Self {
            config,
            exec,
            // 起動に時間がかかるため長めに待つ
            wait: WaitConfig {
                max_retries: 60,
                ..Default::default()
            },
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    fn container(&self) -> String {
        container_name(DependencyType::Keycloak)
    }

    fn realm(&self) -> &str {
        self.config
            .realms
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REALM)
    }

    /// 管理CLIのログイン（成功すればサーバーは応答可能）
    async fn login(&self) -> devflow_container::Result<bool> {
        let cmd = [
            KCADM,
            "config",
            "credentials",
            "--server",
            "http://localhost:8080",
            "--realm",
            DEFAULT_REALM,
            "--user",
            ADMIN_USER,
            "--password",
            ADMIN_PASSWORD,
        ];
        let output = self.exec.exec(&self.container(), &cmd).await?;
        Ok(output.success())
    }

    async fn create_realm(&self, realm: &str) -> Result<()> {
        let realm_arg = format!("realm={}", realm);
        let cmd = [
            KCADM,
            "create",
            "realms",
            "-s",
            realm_arg.as_str(),
            "-s",
            "enabled=true",
        ];
        let output = self.exec.exec(&self.container(), &cmd).await?;

        if output.success() {
            info!(realm, "Realm created");
            return Ok(());
        }

        let message = format!("{}{}", output.stdout, output.stderr);
        if message.contains("Conflict") || message.contains("already exists") {
            debug!(realm, "Realm already exists");
            return Ok(());
        }

        Err(PipelineError::transient(
            DependencyType::Keycloak.as_str(),
            format!(
                "レルム '{}' の作成に失敗しました: {}",
                realm,
                message.trim()
            ),
        ))
    }
}

#[async_trait]
impl DependencyHandler for KeycloakHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::Keycloak
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let image = image_reference(
            "quay.io/keycloak/keycloak",
            self.config.version.as_deref(),
            DEFAULT_VERSION,
        );

        let service = ComposeService::new(image, self.container())
            .command(["start-dev"])
            .port(KEYCLOAK_PORT, 8080)
            .env("KC_BOOTSTRAP_ADMIN_USERNAME", ADMIN_USER)
            .env("KC_BOOTSTRAP_ADMIN_PASSWORD", ADMIN_PASSWORD);
        ctx.compose
            .add_service(DependencyType::Keycloak.as_str(), service);

        ctx.environment.add_both(
            "Authentication__Authority",
            authority("localhost", self.realm()),
            authority(CONTAINER_HOST_GATEWAY, self.realm()),
        )
    }

    async fn after_start(&self, token: &CancellationToken) -> Result<ReadinessOutcome> {
        if self.config.realms.is_empty() {
            return Ok(ReadinessOutcome::Ready);
        }

        let ready = tokio::select! {
            _ = token.cancelled() => return Err(PipelineError::Cancelled),
            result = wait_until("keycloak", &self.wait, || self.login()) => result,
        };

        if let Err(e) = ready {
            warn!(error = %e, "Keycloak did not become ready; continuing in degraded state");
            return Ok(ReadinessOutcome::Degraded);
        }

        for realm in &self.config.realms {
            self.create_realm(realm).await?;
        }

        Ok(ReadinessOutcome::Ready)
    }
}

fn authority(host: &str, realm: &str) -> String {
    format!("http://{}:{}/realms/{}", host, KEYCLOAK_PORT, realm)
}
