//! ストレージエミュレーター

use super::{AZURITE_PORTS, BeforeStartContext, DependencyHandler, container_name};
use crate::error::Result;
use async_trait::async_trait;
use devflow_container::{CONTAINER_HOST_GATEWAY, ComposeService};
use devflow_core::{AzuriteDependency, DependencyType};

const IMAGE: &str = "mcr.microsoft.com/azure-storage/azurite:latest";
const ACCOUNT_NAME: &str = "devstoreaccount1";
/// エミュレーター共通の開発用アカウントキー
const ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

pub struct AzuriteHandler {
    config: AzuriteDependency,
}

impl AzuriteHandler {
    pub fn new(config: AzuriteDependency) -> Self {
        Self { config }
    }

    /// 宣言されたリソース名を `Azurite__<Kind>__<N>` として登録
    fn add_resources(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let groups = [
            ("Containers", &self.config.containers),
            ("Tables", &self.config.tables),
            ("Queues", &self.config.queues),
        ];
        for (kind, names) in groups {
            for (index, name) in names.iter().enumerate() {
                ctx.environment.add_both(
                    format!("Azurite__{}__{}", kind, index),
                    name.clone(),
                    name.clone(),
                )?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DependencyHandler for AzuriteHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::Azurite
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let mut service = ComposeService::new(IMAGE, container_name(DependencyType::Azurite))
            .command([
                "azurite",
                "--blobHost",
                "0.0.0.0",
                "--queueHost",
                "0.0.0.0",
                "--tableHost",
                "0.0.0.0",
                "--skipApiVersionCheck",
            ]);
        for port in AZURITE_PORTS {
            service = service.port(port, port);
        }
        ctx.compose
            .add_service(DependencyType::Azurite.as_str(), service);

        ctx.environment.add_both(
            "ConnectionStrings__AzureStorage",
            connection_string("localhost"),
            connection_string(CONTAINER_HOST_GATEWAY),
        )?;

        self.add_resources(ctx)
    }
}

fn connection_string(host: &str) -> String {
    let [blob, queue, table] = AZURITE_PORTS;
    format!(
        "DefaultEndpointsProtocol=http;AccountName={account};AccountKey={key};\
         BlobEndpoint=http://{host}:{blob}/{account};\
         QueueEndpoint=http://{host}:{queue}/{account};\
         TableEndpoint=http://{host}:{table}/{account};",
        account = ACCOUNT_NAME,
        key = ACCOUNT_KEY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentRegistry, Scope};
    use crate::state::GeneratedPaths;
    use devflow_container::ComposeFile;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_before_start() {
        let handler = AzuriteHandler::new(AzuriteDependency {
            containers: vec!["uploads".to_string(), "exports".to_string()],
            tables: vec![],
            queues: vec!["jobs".to_string()],
        });
        let mut compose = ComposeFile::default();
        let mut environment = EnvironmentRegistry::new();
        let paths = GeneratedPaths::new("/tmp/devflow");
        let token = CancellationToken::new();

        handler
            .before_start(&mut BeforeStartContext {
                compose: &mut compose,
                environment: &mut environment,
                paths: &paths,
                token: &token,
            })
            .unwrap();

        let service = &compose.services["azurite"];
        assert_eq!(service.ports, vec!["10000:10000", "10001:10001", "10002:10002"]);

        let host = environment.resolve(Scope::Host);
        assert!(host["ConnectionStrings__AzureStorage"]
            .contains("BlobEndpoint=http://localhost:10000/devstoreaccount1;"));
        assert_eq!(host["Azurite__Containers__1"], "exports");
        assert_eq!(host["Azurite__Queues__0"], "jobs");

        let container = environment.resolve(Scope::Container);
        assert!(container["ConnectionStrings__AzureStorage"]
            .contains("TableEndpoint=http://host.docker.internal:10002/devstoreaccount1;"));
    }
}
