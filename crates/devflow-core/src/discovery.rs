//! 設定ファイルの自動発見

use std::path::{Path, PathBuf};
use tracing::debug;

/// 探索する設定ファイル名（優先順）
pub const CONFIG_FILE_NAMES: &[&str] = &["devflow.yaml", "devflow.yml"];

/// ディレクトリ内の既定の設定ファイルを探す
///
/// `devflow.yaml` → `devflow.yml` の順に探索し、最初に見つかったものを返します。
#[tracing::instrument(skip(dir), fields(dir = %dir.display()))]
pub fn default_config_file(dir: &Path) -> Option<PathBuf> {
    for name in CONFIG_FILE_NAMES {
        let candidate = dir.join(name);
        debug!(checking = %candidate.display(), "Looking for config file");
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_prefers_yaml_over_yml() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("devflow.yml"), "services: {}").unwrap();
        fs::write(temp.path().join("devflow.yaml"), "services: {}").unwrap();

        assert_eq!(
            default_config_file(temp.path()),
            Some(temp.path().join("devflow.yaml"))
        );
    }

    #[test]
    fn test_falls_back_to_yml() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("devflow.yml"), "services: {}").unwrap();

        assert_eq!(
            default_config_file(temp.path()),
            Some(temp.path().join("devflow.yml"))
        );
    }

    #[test]
    fn test_no_config_file() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(default_config_file(temp.path()), None);
    }
}
