//! サービスの実行時解決
//!
//! ingress（ポート、ホスト、パス）を決定し、有効な runner に応じて
//! プロセス定義または compose サービスを生成します。サービス同士の接続用に
//! ベースURLを環境変数レジストリへ登録します。

use crate::environment::{EnvironmentRegistry, KEY_SEPARATOR};
use crate::error::{PipelineError, Result};
use crate::state::{ApplicationState, ToolPaths};
use devflow_container::{
    CONTAINER_HOST_GATEWAY, ComposeService, PortAllocator, ProcessDefinition, bind_mount,
};
use devflow_core::{
    Ingress, LOOPBACK_HOST, RunnerTarget, Service, ServiceKey, SpecSource, is_loopback_host,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// APIモックのイメージ
pub const MOCK_IMAGE: &str = "stoplight/prism:5";
/// APIモックのコンテナ内ポート
pub const MOCK_PORT: u16 = 4010;
const MOCK_SPEC_DIR: &str = "/tmp/spec";

/// runner から生成されるワークロード
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Process(ProcessDefinition),
    Container(ComposeService),
    /// remote runner（起動するものがない）
    None,
}

/// 解決時に参照する実行設定
pub struct ResolveContext<'a> {
    pub ports: &'a PortAllocator,
    pub proxy_port: u16,
    pub otlp_endpoint: &'a str,
    pub tools: &'a ToolPaths,
}

/// ingress を決定
///
/// 明示されたポートは予約し、衝突すればエラー。指定がなければ空きポートを割り当てます。
pub fn resolve_ingress(service: &Service, ports: &PortAllocator, proxy_port: u16) -> Result<Ingress> {
    let runner = service.active_runner();
    let explicit = service
        .ingress_config
        .port
        .and_then(|p| u16::try_from(p).ok())
        .or(runner.port);

    let internal_port = match explicit {
        Some(port) => {
            ports.reserve(port)?;
            port
        }
        None => ports.allocate_random()?,
    };

    let host = service
        .ingress_config
        .host
        .clone()
        .unwrap_or_else(|| LOOPBACK_HOST.to_string());
    let external_port = (!is_loopback_host(&host)).then_some(proxy_port);

    Ok(Ingress {
        host,
        internal_port,
        external_port,
        path: service.declared_path(),
    })
}

/// ワークロードに渡す環境変数
///
/// 共通の既定値、サービスの env、runner の env の順に上書きします。
pub fn workload_env(
    service: &Service,
    port: u16,
    otlp_endpoint: &str,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("PORT".to_string(), port.to_string()),
        ("DEVFLOW_ENVIRONMENT".to_string(), "Local".to_string()),
        ("Logging__Format".to_string(), "json".to_string()),
        (
            "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
            otlp_endpoint.to_string(),
        ),
        ("OTEL_SERVICE_NAME".to_string(), service.name.clone()),
    ]);
    env.extend(service.env.clone());
    env.extend(service.active_runner().env.clone());
    env
}

/// 有効な runner からワークロードを生成
pub fn build_artifact(
    service: &Service,
    ingress: &Ingress,
    otlp_endpoint: &str,
    tools: &ToolPaths,
) -> Artifact {
    let runner = service.active_runner();
    let port = ingress.internal_port;

    match &runner.target {
        RunnerTarget::Executable {
            command,
            args,
            working_directory,
        } => Artifact::Process(ProcessDefinition {
            name: service.name.clone(),
            command: command.clone(),
            args: args.clone(),
            working_directory: working_directory.clone(),
            env: workload_env(service, port, otlp_endpoint),
        }),
        RunnerTarget::Dotnet { project, watch } => {
            let urls = format!("{}://localhost:{}", runner.protocol.scheme(), port);
            Artifact::Process(ProcessDefinition {
                name: service.name.clone(),
                command: tools.dotnet.display().to_string(),
                args: vec![
                    if *watch { "watch" } else { "run" }.to_string(),
                    "--project".to_string(),
                    project.display().to_string(),
                    "--urls".to_string(),
                    urls,
                ],
                working_directory: project
                    .parent()
                    .unwrap_or(Path::new("."))
                    .to_path_buf(),
                env: workload_env(service, port, otlp_endpoint),
            })
        }
        RunnerTarget::Docker {
            image,
            container_port,
            volumes,
        } => {
            let otlp = container_endpoint(otlp_endpoint);
            let mut compose = ComposeService::new(image.clone(), service.container_name.clone())
                .port(port, *container_port)
                .envs(workload_env(service, *container_port, &otlp));
            for volume in volumes {
                compose = compose.volume(bind_mount(volume));
            }
            Artifact::Container(compose)
        }
        RunnerTarget::OpenApi { spec } => {
            let mut compose = ComposeService::new(MOCK_IMAGE, service.container_name.clone())
                .port(port, MOCK_PORT);
            let spec_arg = match spec {
                SpecSource::Url(url) => url.clone(),
                SpecSource::Path(path) => {
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "openapi.yaml".to_string());
                    let mounted = format!("{}/{}", MOCK_SPEC_DIR, file_name);
                    compose = compose.volume(format!("{}:{}:ro", path.display(), mounted));
                    mounted
                }
            };
            let mock_port = MOCK_PORT.to_string();
            Artifact::Container(compose.command([
                "mock",
                "-h",
                "0.0.0.0",
                "-p",
                mock_port.as_str(),
                spec_arg.as_str(),
            ]))
        }
        RunnerTarget::Remote { .. } => Artifact::None,
    }
}

/// `SERVICES__<NAME>__BASEURL` の変数名
pub fn service_url_key(name: &str) -> String {
    let normalized = name.to_ascii_uppercase().replace('-', "_");
    ["SERVICES", normalized.as_str(), "BASEURL"].join(KEY_SEPARATOR)
}

/// サービスのベースURLを登録
pub fn register_service_url(
    environment: &mut EnvironmentRegistry,
    service: &Service,
    ingress: Option<&Ingress>,
) -> Result<()> {
    let key = service_url_key(&service.name);
    let runner = service.active_runner();

    if let RunnerTarget::Remote { url, .. } = &runner.target {
        return environment.add_both(key, url.clone(), url.clone());
    }

    let Some(ingress) = ingress else {
        return Ok(());
    };

    let scheme = runner.protocol.scheme();
    let host = match ingress.external_port {
        Some(external) if !ingress.is_loopback() => {
            format!("https://{}:{}", ingress.host, external)
        }
        _ => format!("{}://localhost:{}", scheme, ingress.internal_port),
    };
    let container = format!(
        "{}://{}:{}",
        scheme, CONTAINER_HOST_GATEWAY, ingress.internal_port
    );

    environment.add_both(key, host, container)
}

/// サービス1つを解決し、ワークロードを返す
pub fn resolve_service(
    service: &mut Service,
    environment: &mut EnvironmentRegistry,
    ctx: &ResolveContext<'_>,
) -> Result<Artifact> {
    if service.active_runner().is_remote() {
        register_service_url(environment, service, None)?;
        return Ok(Artifact::None);
    }

    let ingress = resolve_ingress(service, ctx.ports, ctx.proxy_port)?;
    service.set_ingress(ingress.clone())?;

    let artifact = build_artifact(service, &ingress, ctx.otlp_endpoint, ctx.tools);
    register_service_url(environment, service, Some(&ingress))?;

    debug!(
        service = %service.name,
        runner = %service.active_runner().kind(),
        port = ingress.internal_port,
        host = %ingress.host,
        "Service resolved"
    );
    Ok(artifact)
}

/// 全サービスを解決し、状態にワークロードを追加
///
/// 解決に失敗したサービスは警告を出して除外します。
pub fn resolve_all(state: &mut ApplicationState) -> Result<()> {
    let keys: Vec<ServiceKey> = state.services.keys().cloned().collect();
    let ports = state.ports.clone();
    let ctx = ResolveContext {
        ports: &ports,
        proxy_port: state.settings.proxy_port,
        otlp_endpoint: &state.settings.otlp_endpoint,
        tools: &state.tools,
    };

    let mut dropped = Vec::new();
    for key in keys {
        let Some(service) = state.services.get_mut(&key) else {
            continue;
        };

        match resolve_service(service, &mut state.environment, &ctx) {
            Ok(Artifact::Process(process)) => state.processes.add(process),
            Ok(Artifact::Container(compose)) => {
                state.compose.add_service(key.as_str(), compose);
                state.service_containers.insert(key.to_string());
            }
            Ok(Artifact::None) => {}
            Err(e @ PipelineError::RegistryFrozen(_)) => return Err(e),
            Err(e) => {
                warn!(service = %key, error = %e, "Skipping service that could not be resolved");
                dropped.push(key);
            }
        }
    }

    for key in &dropped {
        state.services.remove(key);
    }

    info!(
        resolved = state.services.len(),
        dropped = dropped.len(),
        "Services resolved"
    );
    Ok(())
}

/// コンテナから見たエンドポイント（ループバックをホストゲートウェイに置換）
fn container_endpoint(endpoint: &str) -> String {
    endpoint
        .replace("localhost", CONTAINER_HOST_GATEWAY)
        .replace("127.0.0.1", CONTAINER_HOST_GATEWAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Scope;
    use devflow_core::{RunnerDefinition, ServiceDefinition};

    fn service_with(
        name: &str,
        runner: RunnerDefinition,
        host: Option<&str>,
        port: Option<u32>,
        source: &Path,
    ) -> Service {
        let mut def = ServiceDefinition {
            runners: vec![runner],
            ..Default::default()
        };
        def.ingress.host = host.map(String::from);
        def.ingress.port = port;
        Service::from_definition(name, def, source).unwrap()
    }

    fn executable() -> RunnerDefinition {
        RunnerDefinition {
            kind: "executable".to_string(),
            command: Some("npm".to_string()),
            args: vec!["start".to_string()],
            ..Default::default()
        }
    }

    fn context<'a>(ports: &'a PortAllocator, tools: &'a ToolPaths) -> ResolveContext<'a> {
        ResolveContext {
            ports,
            proxy_port: 1347,
            otlp_endpoint: "http://localhost:4317",
            tools,
        }
    }

    #[test]
    fn test_loopback_host_has_no_external_port() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        let service = service_with("web", executable(), None, Some(5080), &source);
        let ports = PortAllocator::new();

        let ingress = resolve_ingress(&service, &ports, 1347).unwrap();
        assert_eq!(ingress.host, "localhost");
        assert_eq!(ingress.internal_port, 5080);
        assert_eq!(ingress.external_port, None);
        assert_eq!(ingress.path, "/");
        assert!(ports.contains(5080));
    }

    #[test]
    fn test_public_host_uses_proxy_port() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        let service = service_with(
            "web",
            executable(),
            Some("web.devflow.localhost"),
            None,
            &source,
        );
        let ports = PortAllocator::new();

        let ingress = resolve_ingress(&service, &ports, 1347).unwrap();
        assert_eq!(ingress.external_port, Some(1347));
        assert!(ports.contains(ingress.internal_port));
    }

    #[test]
    fn test_workload_env_precedence() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        let mut runner = executable();
        runner.env.insert("LEVEL".to_string(), "runner".to_string());
        let mut service = service_with("web", runner, None, None, &source);
        service.env.insert("LEVEL".to_string(), "service".to_string());
        service
            .env
            .insert("DEVFLOW_ENVIRONMENT".to_string(), "Custom".to_string());

        let env = workload_env(&service, 5000, "http://localhost:4317");
        assert_eq!(env["PORT"], "5000");
        assert_eq!(env["LEVEL"], "runner");
        assert_eq!(env["DEVFLOW_ENVIRONMENT"], "Custom");
        assert_eq!(env["OTEL_SERVICE_NAME"], "web");
    }

    #[test]
    fn test_dotnet_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        std::fs::create_dir_all(temp.path().join("src/Api")).unwrap();
        std::fs::write(temp.path().join("src/Api/Api.csproj"), "").unwrap();

        let runner = RunnerDefinition {
            kind: "dotnet".to_string(),
            project: Some("src/Api/Api.csproj".into()),
            watch: Some(true),
            ..Default::default()
        };
        let mut service = service_with("api", runner, None, Some(5100), &source);
        let ports = PortAllocator::new();
        let tools = ToolPaths::default();
        let mut environment = EnvironmentRegistry::new();

        let artifact =
            resolve_service(&mut service, &mut environment, &context(&ports, &tools)).unwrap();

        let Artifact::Process(process) = artifact else {
            panic!("expected a process artifact");
        };
        assert_eq!(process.command, "dotnet");
        assert_eq!(process.args[0], "watch");
        assert_eq!(process.args[4], "http://localhost:5100");
        assert_eq!(process.working_directory, temp.path().join("src/Api"));
        assert_eq!(
            environment.resolve(Scope::Host)["SERVICES__API__BASEURL"],
            "http://localhost:5100"
        );
        assert_eq!(
            environment.resolve(Scope::Container)["SERVICES__API__BASEURL"],
            "http://host.docker.internal:5100"
        );
    }

    #[test]
    fn test_openapi_artifact_mounts_local_spec() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        std::fs::write(temp.path().join("petstore.yaml"), "openapi: 3.0.0").unwrap();

        let runner = RunnerDefinition {
            kind: "openapi".to_string(),
            spec: Some("petstore.yaml".to_string()),
            ..Default::default()
        };
        let service = service_with("petstore", runner, None, None, &source);
        let ingress = Ingress {
            host: "localhost".to_string(),
            internal_port: 4500,
            external_port: None,
            path: "/".to_string(),
        };

        let artifact = build_artifact(
            &service,
            &ingress,
            "http://localhost:4317",
            &ToolPaths::default(),
        );
        let Artifact::Container(compose) = artifact else {
            panic!("expected a container artifact");
        };
        assert_eq!(compose.image, MOCK_IMAGE);
        assert_eq!(compose.ports, vec!["4500:4010"]);
        assert_eq!(compose.command.last().unwrap(), "/tmp/spec/petstore.yaml");
        assert!(compose.volumes[0].ends_with(":/tmp/spec/petstore.yaml:ro"));
    }

    #[test]
    fn test_remote_runner_passes_url_through() {
        let runner = RunnerDefinition {
            kind: "remote".to_string(),
            url: Some("https://orders.example.com".to_string()),
            ..Default::default()
        };
        let mut service = service_with("orders", runner, None, None, Path::new("devflow.yaml"));
        let ports = PortAllocator::new();
        let tools = ToolPaths::default();
        let mut environment = EnvironmentRegistry::new();

        let artifact =
            resolve_service(&mut service, &mut environment, &context(&ports, &tools)).unwrap();

        assert_eq!(artifact, Artifact::None);
        assert!(service.ingress().is_none());
        assert!(ports.reserved().is_empty());
        assert_eq!(
            environment.resolve(Scope::Container)["SERVICES__ORDERS__BASEURL"],
            "https://orders.example.com"
        );
    }

    #[test]
    fn test_conflicting_port_drops_service() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("devflow.yaml");
        let mut state = ApplicationState::new(
            Default::default(),
            Default::default(),
            crate::state::GeneratedPaths::new(temp.path()),
        );
        state.ports.reserve(6000).unwrap();

        for (name, port) in [("first", 6000), ("second", 6001)] {
            let service = service_with(name, executable(), None, Some(port), &source);
            state.services.insert(service.key(), service);
        }

        resolve_all(&mut state).unwrap();

        assert!(!state.services.contains_key(&ServiceKey::new("first")));
        assert!(state.services.contains_key(&ServiceKey::new("second")));
        assert!(state.processes.processes.contains_key("second"));
        assert!(!state.processes.processes.contains_key("first"));
    }

    #[test]
    fn test_service_url_key() {
        assert_eq!(service_url_key("web-api"), "SERVICES__WEB_API__BASEURL");
    }
}
