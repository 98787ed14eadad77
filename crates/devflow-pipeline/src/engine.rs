//! パイプラインエンジン
//!
//! 登録順に各ステップの start を実行し、失敗・キャンセル・正常終了のいずれの場合も
//! 登録済みの全ステップの stop を逆順に一度ずつ実行します。

use crate::error::{PipelineError, Result};
use crate::state::ApplicationState;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 停止処理全体の上限時間
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// パイプラインの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// パイプラインを構成するステップ
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, _state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _state: &mut ApplicationState, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

enum StartOutcome {
    Completed,
    Cancelled,
    Failed(PipelineError),
}

pub struct Pipeline {
    steps: Vec<Box<dyn PipelineStep>>,
    state: PipelineState,
    history: Vec<PipelineState>,
    stop_timeout: Duration,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            state: PipelineState::NotStarted,
            history: Vec::new(),
            stop_timeout: STOP_TIMEOUT,
        }
    }

    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// これまでの状態遷移（NotStarted を除く）
    pub fn transitions(&self) -> &[PipelineState] {
        &self.history
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "Pipeline state changed");
        self.state = next;
        self.history.push(next);
    }

    /// パイプラインを実行
    ///
    /// キャンセルは正常終了として扱います。start が失敗した場合は、停止時の失敗が
    /// あればそれも含めて返します。
    pub async fn run(
        &mut self,
        state: &mut ApplicationState,
        token: &CancellationToken,
    ) -> Result<()> {
        self.transition(PipelineState::Starting);
        let outcome = self.start_all(state, token).await;
        if matches!(outcome, StartOutcome::Completed) {
            self.transition(PipelineState::Running);
        }

        let mut stop_errors = self.stop_all(state).await;

        if let StartOutcome::Failed(start) = outcome {
            self.transition(PipelineState::Failed);
            if stop_errors.is_empty() {
                return Err(start);
            }
            return Err(PipelineError::Failed {
                start: Box::new(start),
                stops: stop_errors,
            });
        }

        self.transition(PipelineState::Stopped);
        match stop_errors.len() {
            0 => Ok(()),
            1 => Err(stop_errors.remove(0)),
            _ => Err(PipelineError::StopFailedMany(stop_errors)),
        }
    }

    async fn start_all(
        &self,
        state: &mut ApplicationState,
        token: &CancellationToken,
    ) -> StartOutcome {
        for step in &self.steps {
            if token.is_cancelled() {
                info!(step = step.name(), "Cancellation requested; skipping remaining steps");
                return StartOutcome::Cancelled;
            }

            info!(step = step.name(), "Starting step");
            match step.start(state, token).await {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => {
                    info!(step = step.name(), "Step cancelled");
                    return StartOutcome::Cancelled;
                }
                Err(e) => {
                    error!(step = step.name(), error = %e, "Step failed");
                    return StartOutcome::Failed(e);
                }
            }
        }
        StartOutcome::Completed
    }

    /// 全ステップを逆順に停止し、失敗を収集
    async fn stop_all(&mut self, state: &mut ApplicationState) -> Vec<PipelineError> {
        self.transition(PipelineState::Stopping);

        let stop_token = CancellationToken::new();
        let timer = {
            let token = stop_token.clone();
            let timeout = self.stop_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        let mut errors = Vec::new();
        for step in self.steps.iter().rev() {
            info!(step = step.name(), "Stopping step");

            // 期限切れ後も各ステップを一度は実行する
            let result = tokio::select! {
                biased;
                result = step.stop(state, &stop_token) => result,
                _ = stop_token.cancelled() => Err(PipelineError::Unhandled(anyhow::anyhow!(
                    "停止処理がタイムアウトしました（{}秒）",
                    self.stop_timeout.as_secs()
                ))),
            };

            if let Err(e) = result {
                error!(step = step.name(), error = %e, "Step failed to stop");
                errors.extend(flatten_stop_error(step.name(), e));
            }
        }

        timer.abort();
        errors
    }
}

/// ステップの停止失敗を `StopFailed` の一覧に展開
fn flatten_stop_error(step: &str, error: PipelineError) -> Vec<PipelineError> {
    match error {
        PipelineError::StopFailedMany(errors) => errors
            .into_iter()
            .flat_map(|e| flatten_stop_error(step, e))
            .collect(),
        e @ PipelineError::StopFailed { .. } => vec![e],
        e => vec![PipelineError::StopFailed {
            step: step.to_string(),
            source: Box::new(e),
        }],
    }
}
