pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ディレクトリを上書きする環境変数
pub const DEVFLOW_HOME_ENV: &str = "DEVFLOW_HOME";

/// リバースプロキシの既定ポート
pub const DEFAULT_PROXY_PORT: u16 = 1347;

/// OTLPエンドポイントの既定値
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const PREFERENCES_FILE: &str = "preferences.yaml";

/// devflowの設定ディレクトリを取得
///
/// `DEVFLOW_HOME` が設定されていればそれを、なければ `~/.config/devflow` を使用します。
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match std::env::var_os(DEVFLOW_HOME_ENV) {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("devflow"),
    };

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 生成ファイルの既定の出力先（`~/.devflow/generated`）
pub fn default_generated_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or(ConfigError::HomeDirNotFound)?
        .join(".devflow")
        .join("generated"))
}

/// ユーザー設定（settings.yaml）
///
/// YAML形式：
/// ```yaml
/// proxy_port: 1347
/// otlp_endpoint: http://localhost:4317
/// generated_dir: /tmp/devflow
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub proxy_port: u16,
    pub otlp_endpoint: String,
    pub generated_dir: Option<PathBuf>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            proxy_port: DEFAULT_PROXY_PORT,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            generated_dir: None,
        }
    }
}

impl UserSettings {
    /// 設定ディレクトリから読み込み
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_dir()?.join(SETTINGS_FILE))
    }

    /// 指定ファイルから読み込み（存在しなければ既定値）
    pub fn load_from(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    /// 生成ファイルの出力先
    pub fn generated_dir(&self) -> Result<PathBuf> {
        match &self.generated_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_generated_dir(),
        }
    }
}

/// ユーザーごとのrunner選択（preferences.yaml）
///
/// YAML形式：
/// ```yaml
/// runners:
///   web-api: docker
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    /// サービス名 → runner 種別
    pub runners: BTreeMap<String, String>,
}

impl UserPreferences {
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_dir()?.join(PREFERENCES_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    /// サービスに対する優先runner（大文字小文字を区別しない）
    pub fn runner_for(&self, service: &str) -> Option<&str> {
        self.runners
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service))
            .map(|(_, runner)| runner.as_str())
    }
}

fn read_yaml<T>(path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !path.exists() {
        debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::InvalidFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_get_config_dir_env_override() {
        let temp_dir = tempfile::tempdir().unwrap();
        let home = temp_dir.path().join("devflow-home");

        unsafe {
            std::env::set_var(DEVFLOW_HOME_ENV, &home);
        }

        let result = get_config_dir();

        unsafe {
            std::env::remove_var(DEVFLOW_HOME_ENV);
        }

        assert_eq!(result.unwrap(), home);
        assert!(home.exists());
    }

    #[test]
    fn test_settings_defaults_when_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = UserSettings::load_from(&temp_dir.path().join(SETTINGS_FILE)).unwrap();

        assert_eq!(settings.proxy_port, 1347);
        assert_eq!(settings.otlp_endpoint, "http://localhost:4317");
        assert!(settings.generated_dir.is_none());
    }

    #[test]
    fn test_settings_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);
        fs::write(&path, "proxy_port: 8443\ngenerated_dir: /tmp/devflow\n").unwrap();

        let settings = UserSettings::load_from(&path).unwrap();
        assert_eq!(settings.proxy_port, 8443);
        assert_eq!(settings.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(
            settings.generated_dir().unwrap(),
            PathBuf::from("/tmp/devflow")
        );
    }

    #[test]
    fn test_settings_malformed_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);
        fs::write(&path, "proxy_port: [not a port").unwrap();

        assert!(matches!(
            UserSettings::load_from(&path),
            Err(ConfigError::InvalidFile { .. })
        ));
    }

    #[test]
    fn test_preferences_lookup_ignores_case() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(PREFERENCES_FILE);
        fs::write(&path, "runners:\n  Web-Api: docker\n").unwrap();

        let prefs = UserPreferences::load_from(&path).unwrap();
        assert_eq!(prefs.runner_for("web-api"), Some("docker"));
        assert_eq!(prefs.runner_for("worker"), None);
    }
}
