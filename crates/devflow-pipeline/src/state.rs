//! 1回の実行で共有されるアプリケーション状態

use crate::certificates::TlsCertificate;
use crate::dependencies::DependencyHandler;
use crate::environment::EnvironmentRegistry;
use crate::proxy::ProxyConfig;
use devflow_config::{UserPreferences, UserSettings};
use devflow_container::{ComposeFile, PortAllocator, ProcessFile};
use devflow_core::{Dependency, DependencyType, Service, ServiceKey};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// compose プロジェクト名
pub const COMPOSE_PROJECT: &str = "devflow";

/// CLIから渡される実行オプション
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 明示的に指定された設定ファイル（空ならカレントディレクトリから探索）
    pub config_paths: Vec<PathBuf>,
    /// 設定ファイルの探索ディレクトリ
    pub search_dir: Option<PathBuf>,
    /// この名前の環境を持つ remote runner を優先する
    pub remote_env: Option<String>,
    /// サービスのワークロードを自動起動しない
    pub start_services_manually: bool,
    pub preferences: UserPreferences,
}

/// 外部コマンドのパス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub docker: PathBuf,
    pub dotnet: PathBuf,
    pub mkcert: PathBuf,
    pub openssl: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            docker: PathBuf::from("docker"),
            dotnet: PathBuf::from("dotnet"),
            mkcert: PathBuf::from("mkcert"),
            openssl: PathBuf::from("openssl"),
        }
    }
}

/// PATH からコマンドを探す
pub fn find_in_path(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// 生成ファイルの配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPaths {
    pub dir: PathBuf,
}

impl GeneratedPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn compose_file(&self) -> PathBuf {
        self.dir.join("docker-compose.yaml")
    }

    pub fn processes_file(&self) -> PathBuf {
        self.dir.join("processes.yaml")
    }

    pub fn app_settings_file(&self) -> PathBuf {
        self.dir.join("appsettings.json")
    }

    pub fn proxy_file(&self) -> PathBuf {
        self.dir.join("proxy.json")
    }

    pub fn eventgrid_settings_file(&self) -> PathBuf {
        self.dir.join("eventgrid.json")
    }

    pub fn certificate_file(&self) -> PathBuf {
        self.dir.join("devflow.pem")
    }

    pub fn certificate_key_file(&self) -> PathBuf {
        self.dir.join("devflow-key.pem")
    }
}

/// パイプライン全体で受け渡される状態
///
/// 実行ごとに生成され、永続化はされません。
pub struct ApplicationState {
    pub options: RunOptions,
    pub settings: UserSettings,
    pub tools: ToolPaths,
    pub paths: GeneratedPaths,
    pub dependencies: Vec<Dependency>,
    pub services: BTreeMap<ServiceKey, Service>,
    pub environment: EnvironmentRegistry,
    pub ports: Arc<PortAllocator>,
    pub compose: ComposeFile,
    pub processes: ProcessFile,
    pub proxy: ProxyConfig,
    /// 公開ホストがある場合に用意された証明書
    pub certificate: Option<TlsCertificate>,
    /// compose 上のサービスのワークロード（依存サービスを除く）
    pub service_containers: BTreeSet<String>,
    pub handlers: Vec<Arc<dyn DependencyHandler>>,
    /// 準備完了を確認できなかった依存サービス
    pub degraded: Vec<DependencyType>,
}

impl ApplicationState {
    pub fn new(options: RunOptions, settings: UserSettings, paths: GeneratedPaths) -> Self {
        Self {
            options,
            settings,
            tools: ToolPaths::default(),
            paths,
            dependencies: Vec::new(),
            services: BTreeMap::new(),
            environment: EnvironmentRegistry::new(),
            ports: Arc::new(PortAllocator::new()),
            compose: ComposeFile::new(COMPOSE_PROJECT),
            processes: ProcessFile::default(),
            proxy: ProxyConfig::default(),
            certificate: None,
            service_containers: BTreeSet::new(),
            handlers: Vec::new(),
            degraded: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// ループバック以外のホストを持つサービスがあるか
    pub fn has_public_hosts(&self) -> bool {
        self.services.values().any(Service::has_public_host)
    }
}
