//! 準備完了待機（Exponential Backoff）

use crate::error::{ContainerError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// 待機設定
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    /// 最大リトライ回数
    pub max_retries: u32,
    /// 初期待機時間（ミリ秒）
    pub initial_delay_ms: u64,
    /// 最大待機時間（ミリ秒）
    pub max_delay_ms: u64,
    /// Exponential倍率
    pub multiplier: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            initial_delay_ms: 250,
            max_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl WaitConfig {
    /// 指定回数目の待機時間を計算（ミリ秒）
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }
}

/// `check` が true を返すまで待機
///
/// `check` のエラーは「まだ準備できていない」として扱います。
pub async fn wait_until<F, Fut>(target: &str, config: &WaitConfig, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 0..config.max_retries {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => debug!(target, attempt, error = %e, "Readiness check failed"),
        }

        // 最後の試行でなければ待機
        if attempt + 1 < config.max_retries {
            sleep(Duration::from_millis(config.delay_for_attempt(attempt))).await;
        }
    }

    Err(ContainerError::ReadinessTimeout {
        target: target.to_string(),
        max_retries: config.max_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_calculation() {
        let config = WaitConfig {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), 1000);
        assert_eq!(config.delay_for_attempt(1), 2000);
        assert_eq!(config.delay_for_attempt(2), 4000);
        assert_eq!(config.delay_for_attempt(3), 8000);
        assert_eq!(config.delay_for_attempt(4), 10000); // capped at max
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = wait_until("db", &WaitConfig::default(), move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let config = WaitConfig {
            max_retries: 3,
            ..Default::default()
        };

        let result = wait_until("db", &config, || async {
            Err(ContainerError::DockerApiError("not ready".to_string()))
        })
        .await;

        assert!(matches!(
            result,
            Err(ContainerError::ReadinessTimeout { max_retries: 3, .. })
        ));
    }
}
