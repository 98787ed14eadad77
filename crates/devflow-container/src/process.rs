//! ホスト上で直接起動するプロセスの定義と停止

use crate::error::Result;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 起動するプロセス1つ分
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessDefinition {
    pub name: String,
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// プロセス監視用の定義ファイル
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessFile {
    pub processes: BTreeMap<String, ProcessDefinition>,
}

impl ProcessFile {
    pub fn add(&mut self, process: ProcessDefinition) {
        self.processes.insert(process.name.clone(), process);
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// プロセスをグレースフルにシャットダウンする
///
/// SIGTERM を送り、5秒以内に終了しなければ SIGKILL を送ります。
pub async fn kill_process_gracefully(pid: i32) {
    let nix_pid = Pid::from_raw(pid);

    info!(pid, "Sending SIGTERM to process");
    if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
        debug!(pid, error = %e, "Failed to send SIGTERM");
        return; // 既に終了している
    }

    let start = Instant::now();
    let timeout = Duration::from_secs(5);

    while start.elapsed() < timeout {
        if !is_process_alive(pid) {
            info!(pid, "Process exited gracefully");
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    warn!(pid, "Timeout reached. Sending SIGKILL to process");
    let _ = signal::kill(nix_pid, Signal::SIGKILL);
}

fn is_process_alive(pid: i32) -> bool {
    // signal 0 を送ることで存在確認が可能
    signal::kill(Pid::from_raw(pid), None).is_ok()
}
