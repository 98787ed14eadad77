//! キャッシュ

use super::{BeforeStartContext, DependencyHandler, REDIS_PORT, container_name};
use crate::error::Result;
use async_trait::async_trait;
use devflow_container::{CONTAINER_HOST_GATEWAY, ComposeService, image_reference};
use devflow_core::{DependencyType, RedisDependency};

const DEFAULT_VERSION: &str = "7-alpine";

pub struct RedisHandler {
    config: RedisDependency,
}

impl RedisHandler {
    pub fn new(config: RedisDependency) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DependencyHandler for RedisHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::Redis
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let image = image_reference("redis", self.config.version.as_deref(), DEFAULT_VERSION);
        let service = ComposeService::new(image, container_name(DependencyType::Redis))
            .port(REDIS_PORT, 6379);
        ctx.compose.add_service(DependencyType::Redis.as_str(), service);

        ctx.environment.add_both(
            "ConnectionStrings__Redis",
            format!("localhost:{}", REDIS_PORT),
            format!("{}:{}", CONTAINER_HOST_GATEWAY, REDIS_PORT),
        )
    }
}
