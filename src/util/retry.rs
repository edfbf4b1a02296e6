/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// AWS推奨のFull Jitter戦略を実装します。`CallPolicy` wraps every external
/// collaborator call with the same timeout, retry and admission rules so the
/// orchestrator never has to.
use std::{future::Future, sync::Arc, time::Duration};

use prometheus::Counter;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::error::{StageError, is_retryable};

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// `attempt` starts at 0 for the first call, which never waits.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(63);
        let exponential_delay = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let capped_delay = exponential_delay.min(self.max_delay_ms);

        let jittered_delay = if capped_delay > 0 {
            rand::rng().random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// Uniform timeout/retry/admission decorator for one collaborator.
///
/// The admission semaphore is shared by every collaborator built from the
/// same registry, which bounds in-flight provider calls when batches run
/// concurrently.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    retry: RetryConfig,
    timeout: Duration,
    admission: Arc<Semaphore>,
    retries: Option<Counter>,
}

impl CallPolicy {
    #[must_use]
    pub fn new(retry: RetryConfig, timeout: Duration, admission: Arc<Semaphore>) -> Self {
        Self {
            retry,
            timeout,
            admission,
            retries: None,
        }
    }

    /// Same retry rules and admission pool, different per-attempt timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Same timeout and admission pool, one attempt only. For calls that
    /// are not safe to repeat.
    #[must_use]
    pub fn single_attempt(&self) -> Self {
        Self {
            retry: RetryConfig {
                max_attempts: 1,
                ..self.retry
            },
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_retry_counter(mut self, counter: Counter) -> Self {
        self.retries = Some(counter);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt holds one admission permit.
    ///
    /// # Errors
    /// Returns the last failure normalized into a [`StageError`].
    pub async fn call<T, F, Fut>(&self, provider: &'static str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = {
                let _permit = self.admission.acquire().await.map_err(|_| {
                    StageError::unavailable(format!("{provider} admission pool closed"))
                })?;
                tokio::time::timeout(self.timeout, op()).await
            };

            let (error, retryable) = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        info!(provider, attempt, "provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    let retryable = is_retryable(&err);
                    (StageError::provider(provider, &err), retryable)
                }
                Err(_) => (
                    StageError::Timeout {
                        provider,
                        after: self.timeout,
                    },
                    true,
                ),
            };

            attempt += 1;

            if !retryable {
                warn!(provider, error = %error, "provider error is not retryable");
                return Err(error);
            }

            if !self.retry.can_retry(attempt) {
                warn!(
                    provider,
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    error = %error,
                    "provider call failed after all retries"
                );
                return Err(error);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                provider,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "provider call failed, retrying after delay"
            );
            if let Some(counter) = &self.retries {
                counter.inc();
            }
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    fn policy(max_attempts: usize, timeout: Duration) -> CallPolicy {
        CallPolicy::new(
            RetryConfig::new(max_attempts, 0, 0),
            timeout,
            Arc::new(Semaphore::new(2)),
        )
    }

    fn transient() -> anyhow::Error {
        anyhow::Error::new(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
    }

    #[test]
    fn delay_for_attempt_zero_is_zero() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(0));
    }

    #[test]
    fn delay_for_attempt_is_bounded_by_exponential_cap() {
        let config = RetryConfig::new(5, 100, 10000);
        assert!(config.delay_for_attempt(1) <= Duration::from_millis(100));
        assert!(config.delay_for_attempt(2) <= Duration::from_millis(200));
        assert!(config.delay_for_attempt(3) <= Duration::from_millis(400));
    }

    #[test]
    fn delay_for_attempt_respects_max_delay() {
        let config = RetryConfig::new(10, 100, 500);
        assert!(config.delay_for_attempt(10) <= Duration::from_millis(500));
        assert!(config.delay_for_attempt(200) <= Duration::from_millis(500));
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let config = RetryConfig::new(3, 100, 1000);
        assert!(config.can_retry(2));
        assert!(!config.can_retry(3));
    }

    #[tokio::test]
    async fn call_retries_transient_failures_until_success() {
        let calls = AtomicUsize::new(0);
        let result = policy(3, Duration::from_secs(1))
            .call("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(transient()) } else { Ok(n) }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn call_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = policy(2, Duration::from_secs(1))
            .call("places", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(StageError::Provider { provider: "places", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn call_does_not_retry_permanent_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = policy(5, Duration::from_secs(1))
            .call("gemini", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("unparseable response")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn call_maps_elapsed_attempts_to_timeout() {
        let result: Result<(), _> = policy(1, Duration::from_millis(10))
            .call("vision", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(StageError::Timeout { provider: "vision", .. })
        ));
    }

    #[tokio::test]
    async fn retry_counter_tracks_each_retry() {
        let counter = Counter::new("test_retries_total", "retries").expect("counter");
        let calls = AtomicUsize::new(0);
        let _ = policy(3, Duration::from_secs(1))
            .with_retry_counter(counter.clone())
            .call("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await;

        assert!((counter.get() - 2.0).abs() < f64::EPSILON);
    }
}
