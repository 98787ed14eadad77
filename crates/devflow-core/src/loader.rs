//! 設定ファイルの集約
//!
//! 複数の設定ファイルを読み込み、依存サービスを種別ごとにマージし、
//! サービス定義を個別に検証します。

use crate::discovery::default_config_file;
use crate::error::{FlowError, Result};
use crate::model::{ConfigDocument, Dependency, Service, ServiceDefinition, ServiceKey};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 読み込み済みの設定ファイル
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub document: ConfigDocument,
}

/// 設定ファイル集約器
///
/// 読み込みは最初の呼び出しで一度だけ行われ、以降は結果を再利用します。
#[derive(Debug)]
pub struct ConfigAggregator {
    paths: Vec<PathBuf>,
    search_dir: PathBuf,
    documents: Mutex<Option<Arc<Vec<LoadedDocument>>>>,
    #[cfg(test)]
    loads: std::sync::atomic::AtomicUsize,
}

impl ConfigAggregator {
    /// 明示的なパスを指定して生成
    ///
    /// `paths` が空の場合はカレントディレクトリの `devflow.yaml` / `devflow.yml` を使用します。
    pub fn new(paths: Vec<PathBuf>) -> Self {
        let search_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_search_dir(paths, search_dir)
    }

    /// 探索ディレクトリを指定して生成
    pub fn with_search_dir(paths: Vec<PathBuf>, search_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            search_dir: search_dir.into(),
            documents: Mutex::new(None),
            #[cfg(test)]
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// 実際に読み込む対象のパス
    pub fn config_paths(&self) -> Vec<PathBuf> {
        if !self.paths.is_empty() {
            return self.paths.clone();
        }
        default_config_file(&self.search_dir).into_iter().collect()
    }

    /// 読み込めた設定ファイル一覧
    ///
    /// 存在しない・読めない・不正なファイルは警告を出してスキップします。
    /// 読み込み中はロックを保持するため、同時に呼ばれても読み込みは一度だけです。
    pub fn documents(&self) -> Arc<Vec<LoadedDocument>> {
        let mut guard = self.documents.lock();
        if let Some(docs) = guard.as_ref() {
            return Arc::clone(docs);
        }

        let loaded = Arc::new(self.load_all());
        *guard = Some(Arc::clone(&loaded));
        loaded
    }

    /// 設定ファイルが1つ以上読み込めていることを要求
    pub fn documents_required(&self) -> Result<Arc<Vec<LoadedDocument>>> {
        let documents = self.documents();
        if !documents.is_empty() {
            return Ok(documents);
        }

        if self.paths.is_empty() {
            Err(FlowError::NoConfiguration(self.search_dir.clone()))
        } else {
            Err(FlowError::NoReadableConfiguration(self.paths.clone()))
        }
    }

    /// 種別ごとにマージした依存サービス一覧
    ///
    /// 未知の種別を含むファイルがある場合はエラー。
    #[instrument(skip(self))]
    pub fn dependencies(&self) -> Result<Vec<Dependency>> {
        let mut merged: BTreeMap<_, Dependency> = BTreeMap::new();

        for loaded in self.documents().iter() {
            for value in &loaded.document.dependencies {
                let dependency = Dependency::from_value(value.clone())?;
                let key = dependency.dependency_type();
                let next = match merged.remove(&key) {
                    Some(existing) => existing.merge(dependency),
                    None => dependency,
                };
                merged.insert(key, next);
            }
        }

        info!(count = merged.len(), "Dependencies merged");
        Ok(merged.into_values().collect())
    }

    /// 検証済みのサービス一覧
    ///
    /// 各サービスは個別に検証され、不正なものは警告を出して除外されます。
    /// 大文字小文字を区別せずに名前が重複した場合は最初の定義を採用します。
    #[instrument(skip(self))]
    pub fn services(&self) -> Vec<Service> {
        let mut services: BTreeMap<ServiceKey, Service> = BTreeMap::new();

        for loaded in self.documents().iter() {
            for (name, value) in &loaded.document.services {
                match convert_service(name, value, &loaded.path) {
                    Ok(service) => {
                        let key = service.key();
                        if let Some(first) = services.get(&key) {
                            let error = FlowError::DuplicateService {
                                name: name.clone(),
                                first: first.source.clone(),
                                second: loaded.path.clone(),
                            };
                            warn!(service = %name, error = %error, "Skipping duplicate service");
                            continue;
                        }
                        services.insert(key, service);
                    }
                    Err(error) => {
                        warn!(service = %name, file = %loaded.path.display(), error = %error, "Skipping invalid service");
                    }
                }
            }
        }

        info!(count = services.len(), "Services loaded");
        services.into_values().collect()
    }

    fn load_all(&self) -> Vec<LoadedDocument> {
        #[cfg(test)]
        self.loads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let paths = self.config_paths();
        debug!(files = paths.len(), "Loading configuration files");

        paths
            .into_iter()
            .filter_map(|path| match load_document(&path) {
                Ok(document) => {
                    info!(file = %path.display(), "Loaded configuration file");
                    Some(LoadedDocument {
                        path: absolute(&path),
                        document,
                    })
                }
                Err(error) => {
                    warn!(file = %path.display(), error = %error, "Skipping configuration file");
                    None
                }
            })
            .collect()
    }
}

/// 設定ファイルを1つ読み込む
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_document(path: &Path) -> Result<ConfigDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| FlowError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // 空ファイルは空のドキュメントとして扱う
    if content.trim().is_empty() {
        return Ok(ConfigDocument::default());
    }

    serde_yaml::from_str(&content).map_err(|source| FlowError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn convert_service(name: &str, value: &serde_yaml::Value, source: &Path) -> Result<Service> {
    let definition: ServiceDefinition =
        serde_yaml::from_value(value.clone()).map_err(|source_err| FlowError::Yaml {
            path: source.to_path_buf(),
            source: source_err,
        })?;
    Service::from_definition(name, definition, source)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DependencyType;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_configuration() {
        let temp = tempfile::tempdir().unwrap();
        let aggregator = ConfigAggregator::with_search_dir(vec![], temp.path());

        assert!(aggregator.documents().is_empty());
        assert!(matches!(
            aggregator.documents_required(),
            Err(FlowError::NoConfiguration(_))
        ));
    }

    #[test]
    fn test_explicit_paths_named_when_none_load() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("missing.yaml");

        let aggregator = ConfigAggregator::with_search_dir(vec![missing.clone()], temp.path());
        match aggregator.documents_required() {
            Err(FlowError::NoReadableConfiguration(paths)) => assert_eq!(paths, vec![missing]),
            other => panic!("unexpected result: {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_default_file_lookup() {
        let temp = tempfile::tempdir().unwrap();
        write(temp.path(), "devflow.yml", "services: {}");

        let aggregator = ConfigAggregator::with_search_dir(vec![], temp.path());
        assert_eq!(aggregator.documents_required().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_files_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let good = write(temp.path(), "a.yaml", "dependencies:\n  - type: redis\n");
        let bad = write(temp.path(), "b.yaml", "services: [unclosed");
        let missing = temp.path().join("missing.yaml");

        let aggregator = ConfigAggregator::with_search_dir(vec![good, bad, missing], temp.path());
        assert_eq!(aggregator.documents().len(), 1);
    }

    #[test]
    fn test_documents_are_memoized() {
        let temp = tempfile::tempdir().unwrap();
        let path = write(temp.path(), "devflow.yaml", "services: {}");

        let aggregator = ConfigAggregator::with_search_dir(vec![path.clone()], temp.path());
        let first = aggregator.documents();
        fs::remove_file(&path).unwrap();
        let second = aggregator.documents();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_callers_load_once() {
        let temp = tempfile::tempdir().unwrap();
        let mut content = String::from("services:\n");
        for i in 0..2000 {
            content.push_str(&format!(
                "  svc-{i}:\n    runners:\n      - type: remote\n        url: https://svc-{i}.example.com\n"
            ));
        }
        let path = write(temp.path(), "devflow.yaml", &content);

        let aggregator = ConfigAggregator::with_search_dir(vec![path], temp.path());
        let barrier = std::sync::Barrier::new(8);
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        aggregator.documents()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(aggregator.loads.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(results.iter().all(|docs| Arc::ptr_eq(docs, &results[0])));
        assert_eq!(results[0][0].document.services.len(), 2000);
    }

    #[test]
    fn test_dependencies_are_merged_by_type() {
        let temp = tempfile::tempdir().unwrap();
        let a = write(
            temp.path(),
            "a.yaml",
            "dependencies:\n  - type: postgres\n    databases: [orders]\n  - type: redis\n",
        );
        let b = write(
            temp.path(),
            "b.yaml",
            "dependencies:\n  - type: postgres\n    version: '15'\n    databases: [ORDERS, users]\n",
        );

        let aggregator = ConfigAggregator::with_search_dir(vec![a, b], temp.path());
        let deps = aggregator.dependencies().unwrap();

        assert_eq!(deps.len(), 2);
        let postgres = deps
            .iter()
            .find(|d| d.dependency_type() == DependencyType::Postgres)
            .unwrap();
        match postgres {
            Dependency::Postgres(p) => {
                assert_eq!(p.version.as_deref(), Some("15"));
                assert_eq!(p.databases, vec!["orders", "users"]);
            }
            other => panic!("unexpected dependency: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_type_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let a = write(temp.path(), "a.yaml", "dependencies:\n  - type: oracle\n");

        let aggregator = ConfigAggregator::with_search_dir(vec![a], temp.path());
        assert!(matches!(
            aggregator.dependencies(),
            Err(FlowError::UnknownDependencyType(_))
        ));
    }

    #[test]
    fn test_invalid_services_are_dropped_individually() {
        let temp = tempfile::tempdir().unwrap();
        let a = write(
            temp.path(),
            "a.yaml",
            r#"
services:
  good:
    runners:
      - type: remote
        url: https://good.example.com
  bad_name:
    runners:
      - type: remote
        url: https://bad.example.com
  no-runner: {}
  bad-host:
    ingress: { host: api.example.com }
    runners:
      - type: remote
        url: https://example.com
  missing-path:
    runners:
      - type: dotnet
        project: ./does/not/exist.csproj
"#,
        );

        let aggregator = ConfigAggregator::with_search_dir(vec![a], temp.path());
        let services = aggregator.services();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "good");
    }

    #[test]
    fn test_duplicate_service_first_wins() {
        let temp = tempfile::tempdir().unwrap();
        let a = write(
            temp.path(),
            "a.yaml",
            "services:\n  api:\n    runners:\n      - type: remote\n        url: https://a.example.com\n",
        );
        let b = write(
            temp.path(),
            "b.yaml",
            "services:\n  API:\n    runners:\n      - type: remote\n        url: https://b.example.com\n",
        );

        let aggregator = ConfigAggregator::with_search_dir(vec![a.clone(), b], temp.path());
        let services = aggregator.services();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "api");
        assert_eq!(services[0].source, a);
    }
}
