//! 第三方调用重试
//!
//! Paystack 与 Resend 的超时、5xx 按翻倍退避重试；业务失败（如 Paystack 返回
//! `status: false`）由 `is_retryable` 判定后直接返回。Paystack 请求都带唯一
//! reference，重放不会重复扣款或打款。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::error::AgriError;

/// 退避上限的翻倍次数，避免移位溢出
const MAX_DOUBLINGS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 首次之外的最多重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 在 [delay/2, delay] 内随机等待
    pub jitter: bool,
}

impl RetryPolicy {
    /// 位于用户请求路径上的第三方接口
    pub const fn external_api() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }

    /// 只执行一次
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// 第 `attempt` 次重试（从 0 开始）前的基准等待：base * 2^attempt，不超过 max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_DOUBLINGS);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let millis = delay.as_millis() as u64;
        if !self.jitter || millis < 2 {
            return delay;
        }
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }
}

/// 按策略执行异步操作
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&AgriError) -> bool,
    mut operation: F,
) -> Result<T, AgriError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgriError>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, retries = attempt, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) || attempt >= policy.max_retries {
            warn!(operation = operation_name, retries = attempt, error = %err, "调用失败");
            return Err(err);
        }

        let wait = policy.sleep_for(attempt);
        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "瞬时错误，稍后重试"
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    fn timeout() -> AgriError {
        AgriError::ExternalServiceTimeout {
            service: "paystack".to_string(),
        }
    }

    #[test]
    fn test_external_api_backoff() {
        let policy = RetryPolicy::external_api();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::external_api();
        for _ in 0..50 {
            let wait = policy.sleep_for(1);
            assert!(wait >= Duration::from_millis(200) && wait <= Duration::from_millis(400));
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&fast(3), "paystack.verify", AgriError::is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(timeout()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_policy(&fast(3), "paystack.transfer", AgriError::is_retryable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgriError::Validation("invalid bank code".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(AgriError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(&fast(2), "resend.send", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = retry_with_policy(&RetryPolicy::none(), "op", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
