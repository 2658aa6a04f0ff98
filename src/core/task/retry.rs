use std::time::Duration;
use crate::core::error::FetchError;

/// 子任务重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64, // 抖动因子，避免重试风暴
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% 的抖动
        }
    }
}

impl RetryStrategy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &FetchError, retry_count: usize) -> bool {
        retry_count < self.max_retries && error.is_retryable()
    }

    pub fn get_delay(&self, retry_count: usize) -> Duration {
        let delay_secs = self.base_delay.as_secs_f64() *
            self.backoff_multiplier.powi(retry_count as i32);

        let jitter = delay_secs * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (delay_secs + jitter).max(0.0);

        Duration::from_secs_f64(final_delay).min(self.max_delay)
    }
}

/// 单个子任务的重试上下文
#[derive(Debug)]
pub struct RetryContext {
    pub strategy: RetryStrategy,
    pub retry_count: usize,
    /// 累计退避等待
    pub total_retry_time: Duration,
}

impl RetryContext {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            retry_count: 0,
            total_retry_time: Duration::from_secs(0),
        }
    }

    pub fn should_retry(&self, error: &FetchError) -> bool {
        self.strategy.should_retry(error, self.retry_count)
    }

    /// 记录一次重试，返回本次应等待的时间
    pub fn increment_retry(&mut self) -> Duration {
        let delay = self.strategy.get_delay(self.retry_count);
        self.retry_count += 1;
        self.total_retry_time += delay;
        delay
    }
}
