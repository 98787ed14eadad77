//! Pub/Subエミュレーター
//!
//! エミュレーターの設定ファイルはユーザーが編集できるため、宣言されたトピックとの
//! 和集合を取り、変更があった場合のみ書き戻します。ファイルの変更を監視して再適用します。

use super::{BeforeStartContext, DependencyHandler, EVENTGRID_PORT, container_name};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use devflow_container::{CONTAINER_HOST_GATEWAY, ComposeService};
use devflow_core::{DependencyType, EventGridDependency, union_topics};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IMAGE: &str = "workleap/eventgridemulator:latest";
const TOPICS_KEY: &str = "Topics";

/// ファイル変更イベントの静穏期間
pub const DEBOUNCE: Duration = Duration::from_millis(100);

type Topics = BTreeMap<String, Vec<String>>;

pub struct EventGridHandler {
    config: EventGridDependency,
    /// 設定ファイルの読み書きを直列化
    file_lock: Arc<Mutex<()>>,
    watcher: parking_lot::Mutex<Option<RecommendedWatcher>>,
    worker_token: parking_lot::Mutex<Option<CancellationToken>>,
}

impl EventGridHandler {
    pub fn new(config: EventGridDependency) -> Self {
        Self {
            config,
            file_lock: Arc::new(Mutex::new(())),
            watcher: parking_lot::Mutex::new(None),
            worker_token: parking_lot::Mutex::new(None),
        }
    }

    /// 設定ファイルの監視と再適用ワーカーを開始
    fn watch(&self, path: &Path, token: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel::<()>(1);
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            let relevant = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if relevant {
                // 既に通知待ちがあれば捨てる
                let _ = tx.try_send(());
            }
        })
        .map_err(|e| PipelineError::Unhandled(e.into()))?;

        let dir = path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| PipelineError::Unhandled(e.into()))?;

        *self.watcher.lock() = Some(watcher);
        *self.worker_token.lock() = Some(token.clone());

        let path = path.to_path_buf();
        let topics = self.config.topics.clone();
        let file_lock = Arc::clone(&self.file_lock);

        tokio::spawn(debounce_loop(rx, token, DEBOUNCE, move || {
            let path = path.clone();
            let topics = topics.clone();
            let file_lock = Arc::clone(&file_lock);
            async move {
                let _guard = file_lock.lock().await;
                let file = path.clone();
                let result = tokio::task::spawn_blocking(move || reconcile_settings(&file, &topics))
                    .await
                    .map_err(|e| PipelineError::Unhandled(e.into()))
                    .and_then(|r| r);
                match result {
                    Ok(true) => info!(file = %path.display(), "EventGrid settings re-applied"),
                    Ok(false) => debug!(file = %path.display(), "EventGrid settings unchanged"),
                    Err(e) => warn!(file = %path.display(), error = %e, "Failed to re-apply EventGrid settings"),
                }
            }
        }));

        debug!(file = %dir.display(), "Watching EventGrid settings");
        Ok(())
    }
}

#[async_trait]
impl DependencyHandler for EventGridHandler {
    fn dependency_type(&self) -> DependencyType {
        DependencyType::EventGrid
    }

    fn before_start(&self, ctx: &mut BeforeStartContext<'_>) -> Result<()> {
        let settings = ctx.paths.eventgrid_settings_file();
        if reconcile_settings(&settings, &self.config.topics)? {
            info!(file = %settings.display(), "EventGrid settings written");
        }

        let service = ComposeService::new(IMAGE, container_name(DependencyType::EventGrid))
            .port(EVENTGRID_PORT, 6500)
            .volume(format!("{}:/app/appsettings.json:ro", settings.display()));
        ctx.compose
            .add_service(DependencyType::EventGrid.as_str(), service);

        ctx.environment.add_both(
            "EventGrid__Endpoint",
            format!("http://localhost:{}", EVENTGRID_PORT),
            format!("http://{}:{}", CONTAINER_HOST_GATEWAY, EVENTGRID_PORT),
        )?;

        self.watch(&settings, ctx.token.child_token())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(token) = self.worker_token.lock().take() {
            token.cancel();
        }
        self.watcher.lock().take();
        Ok(())
    }
}

/// 設定ファイルに宣言済みトピックを反映
///
/// 既存ファイルのトピックと宣言の和集合を取り、内容が変わる場合のみ書き込みます。
/// 書き込んだ場合は true を返します。
pub fn reconcile_settings(path: &Path, declared: &Topics) -> Result<bool> {
    let mut root = match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(invalid(path, "ルートがオブジェクトではありません")),
                Err(e) => return Err(invalid(path, e)),
            }
        }
        Ok(_) => Map::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };

    let existing: Option<Topics> = match root.get(TOPICS_KEY) {
        Some(value) => Some(serde_json::from_value(value.clone()).map_err(|e| invalid(path, e))?),
        None => None,
    };

    let merged = union_topics(existing.clone().unwrap_or_default(), declared.clone());
    if existing.as_ref() == Some(&merged) {
        return Ok(false);
    }

    root.insert(
        TOPICS_KEY.to_string(),
        serde_json::to_value(&merged).map_err(|e| PipelineError::Unhandled(e.into()))?,
    );
    let content = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|e| PipelineError::Unhandled(e.into()))?;
    std::fs::write(path, content)?;
    Ok(true)
}

fn invalid(path: &Path, reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::UserConfiguration(format!(
        "EventGrid 設定ファイルの形式が不正です: {}\n理由: {}",
        path.display(),
        reason
    ))
}

/// 通知を静穏期間でまとめてから `apply` を実行するワーカー
///
/// 静穏期間中に新しい通知が来るとタイマーをやり直します。
pub(crate) async fn debounce_loop<F, Fut>(
    mut rx: mpsc::Receiver<()>,
    token: CancellationToken,
    quiet: Duration,
    mut apply: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            event = rx.recv() => if event.is_none() { return },
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(quiet) => break,
                event = rx.recv() => if event.is_none() { return },
            }
        }

        apply().await;
    }
}
