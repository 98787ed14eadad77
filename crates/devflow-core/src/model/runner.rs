//! Runner定義（サービスの実行方法）

use super::document::RunnerDefinition;
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Runner種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Executable,
    Docker,
    Dotnet,
    OpenApi,
    Remote,
}

impl RunnerKind {
    /// 文字列からパース
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "executable" => Some(Self::Executable),
            "docker" | "container" => Some(Self::Docker),
            "dotnet" => Some(Self::Dotnet),
            "openapi" => Some(Self::OpenApi),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::Docker => "docker",
            Self::Dotnet => "dotnet",
            Self::OpenApi => "openapi",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    /// 文字列からProtocolをパース
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "https" => Protocol::Https,
            _ => Protocol::Http,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// ボリュームマウント
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub read_only: bool,
}

/// OpenAPI仕様の参照先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecSource {
    Path(PathBuf),
    Url(String),
}

/// Runnerの種別ごとの実行内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerTarget {
    Executable {
        command: String,
        args: Vec<String>,
        working_directory: PathBuf,
    },
    Docker {
        image: String,
        container_port: u16,
        volumes: Vec<VolumeMount>,
    },
    Dotnet {
        project: PathBuf,
        watch: bool,
    },
    OpenApi {
        spec: SpecSource,
    },
    Remote {
        url: String,
        environment: Option<String>,
    },
}

/// Runner定義（検証済み）
///
/// 全ての種別で `port`, `protocol`, `env` を共有します。
/// `env` はサービスレベルの環境変数より優先されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub env: BTreeMap<String, String>,
    pub target: RunnerTarget,
}

impl Runner {
    pub fn kind(&self) -> RunnerKind {
        match &self.target {
            RunnerTarget::Executable { .. } => RunnerKind::Executable,
            RunnerTarget::Docker { .. } => RunnerKind::Docker,
            RunnerTarget::Dotnet { .. } => RunnerKind::Dotnet,
            RunnerTarget::OpenApi { .. } => RunnerKind::OpenApi,
            RunnerTarget::Remote { .. } => RunnerKind::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.target, RunnerTarget::Remote { .. })
    }

    /// 生の定義から検証済みRunnerを生成
    ///
    /// 相対パスは宣言元ファイルのディレクトリを基準に解決し、存在しない場合はエラー。
    pub fn from_definition(service: &str, def: RunnerDefinition, base_dir: &Path) -> Result<Self> {
        let kind = RunnerKind::parse(&def.kind)
            .ok_or_else(|| FlowError::UnknownRunnerType {
                service: service.to_string(),
                kind: def.kind.clone(),
            })?;

        let port = match def.port {
            None => None,
            Some(p) if (1..=u16::MAX as u32).contains(&p) => Some(p as u16),
            Some(p) => {
                return Err(FlowError::InvalidPort {
                    service: service.to_string(),
                    port: p,
                });
            }
        };

        let missing = |field: &'static str| FlowError::MissingField {
            service: service.to_string(),
            runner: kind.as_str(),
            field,
        };

        let target = match kind {
            RunnerKind::Executable => {
                let command = def.command.ok_or_else(|| missing("command"))?;
                let working_directory = resolve_existing(
                    service,
                    base_dir,
                    def.working_directory.as_deref().unwrap_or(Path::new(".")),
                )?;
                RunnerTarget::Executable {
                    command,
                    args: def.args,
                    working_directory,
                }
            }
            RunnerKind::Docker => {
                let image = def.image.ok_or_else(|| missing("image"))?;
                let container_port = match def.container_port {
                    None => return Err(missing("container_port")),
                    Some(p) if (1..=u16::MAX as u32).contains(&p) => p as u16,
                    Some(p) => {
                        return Err(FlowError::InvalidPort {
                            service: service.to_string(),
                            port: p,
                        });
                    }
                };
                let volumes = def
                    .volumes
                    .into_iter()
                    .map(|v| {
                        Ok(VolumeMount {
                            host: resolve_existing(service, base_dir, &v.host)?,
                            container: v.container,
                            read_only: v.read_only,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                RunnerTarget::Docker {
                    image,
                    container_port,
                    volumes,
                }
            }
            RunnerKind::Dotnet => {
                let project = def.project.ok_or_else(|| missing("project"))?;
                RunnerTarget::Dotnet {
                    project: resolve_existing(service, base_dir, &project)?,
                    watch: def.watch.unwrap_or(false),
                }
            }
            RunnerKind::OpenApi => {
                let spec = def.spec.ok_or_else(|| missing("spec"))?;
                let spec = if spec.starts_with("http://") || spec.starts_with("https://") {
                    SpecSource::Url(spec)
                } else {
                    SpecSource::Path(resolve_existing(service, base_dir, Path::new(&spec))?)
                };
                RunnerTarget::OpenApi { spec }
            }
            RunnerKind::Remote => RunnerTarget::Remote {
                url: def.url.ok_or_else(|| missing("url"))?,
                environment: def.environment,
            },
        };

        Ok(Self {
            port,
            protocol: def.protocol.as_deref().map(Protocol::parse).unwrap_or_default(),
            env: def.env,
            target,
        })
    }
}

/// 宣言元ディレクトリ基準でパスを解決し、存在を確認
fn resolve_existing(service: &str, base_dir: &Path, path: &Path) -> Result<PathBuf> {
    let resolved = if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    };

    if !resolved.exists() {
        return Err(FlowError::PathNotFound {
            service: service.to_string(),
            path: resolved,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::document::VolumeDefinition;

    fn definition(kind: &str) -> RunnerDefinition {
        RunnerDefinition {
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_runner_kind_parse() {
        assert_eq!(RunnerKind::parse("Docker"), Some(RunnerKind::Docker));
        assert_eq!(RunnerKind::parse("container"), Some(RunnerKind::Docker));
        assert_eq!(RunnerKind::parse("openapi"), Some(RunnerKind::OpenApi));
        assert_eq!(RunnerKind::parse("unknown"), None);
    }

    #[test]
    fn test_executable_runner_requires_command() {
        let temp = tempfile::tempdir().unwrap();
        let result = Runner::from_definition("api", definition("executable"), temp.path());
        assert!(matches!(
            result,
            Err(FlowError::MissingField {
                field: "command",
                ..
            })
        ));
    }

    #[test]
    fn test_executable_runner_resolves_working_directory() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("app")).unwrap();

        let def = RunnerDefinition {
            command: Some("npm".to_string()),
            args: vec!["start".to_string()],
            working_directory: Some(PathBuf::from("app")),
            port: Some(3000),
            ..definition("executable")
        };

        let runner = Runner::from_definition("web", def, temp.path()).unwrap();
        assert_eq!(runner.port, Some(3000));
        assert_eq!(runner.kind(), RunnerKind::Executable);
        match runner.target {
            RunnerTarget::Executable {
                working_directory, ..
            } => assert_eq!(working_directory, temp.path().join("app")),
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_missing_path_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let def = RunnerDefinition {
            project: Some(PathBuf::from("src/Api/Api.csproj")),
            ..definition("dotnet")
        };

        let result = Runner::from_definition("api", def, temp.path());
        assert!(matches!(result, Err(FlowError::PathNotFound { .. })));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let def = RunnerDefinition {
            url: Some("https://example.com".to_string()),
            port: Some(70000),
            ..definition("remote")
        };

        let result = Runner::from_definition("api", def, Path::new("."));
        assert!(matches!(
            result,
            Err(FlowError::InvalidPort { port: 70000, .. })
        ));
    }

    #[test]
    fn test_docker_runner_with_volume() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("data")).unwrap();

        let def = RunnerDefinition {
            image: Some("nginx:alpine".to_string()),
            container_port: Some(80),
            volumes: vec![VolumeDefinition {
                host: PathBuf::from("data"),
                container: "/usr/share/nginx/html".to_string(),
                read_only: true,
            }],
            protocol: Some("https".to_string()),
            ..definition("docker")
        };

        let runner = Runner::from_definition("web", def, temp.path()).unwrap();
        assert_eq!(runner.protocol, Protocol::Https);
        match runner.target {
            RunnerTarget::Docker {
                container_port,
                volumes,
                ..
            } => {
                assert_eq!(container_port, 80);
                assert_eq!(volumes.len(), 1);
                assert!(volumes[0].read_only);
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_openapi_runner_accepts_url() {
        let def = RunnerDefinition {
            spec: Some("https://petstore3.swagger.io/api/v3/openapi.json".to_string()),
            ..definition("openapi")
        };

        let runner = Runner::from_definition("petstore", def, Path::new(".")).unwrap();
        assert!(matches!(
            runner.target,
            RunnerTarget::OpenApi {
                spec: SpecSource::Url(_)
            }
        ));
    }
}
