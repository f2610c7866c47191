use crate::error::{Result, StackError};
use std::time::Duration;

/// 試行回数の上限付き指数バックオフと、全体の期限を組み合わせたリトライ方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    deadline: Duration,
}

impl RetryPolicy {
    /// `max_attempts >= 1` かつ `base_delay <= max_delay` でなければ失敗する
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        deadline: Duration,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(StackError::InvalidInput(
                "max_attempts は 1 以上である必要があります".to_string(),
            ));
        }
        if base_delay > max_delay {
            return Err(StackError::InvalidInput(format!(
                "base_delay ({:?}) は max_delay ({:?}) 以下である必要があります",
                base_delay, max_delay
            )));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay,
            deadline,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// `failed_attempt` 回目（1始まり）の失敗後に待つ時間
    ///
    /// `min(base_delay * 2^(failed_attempt - 1), max_delay)`
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            deadline: Duration::from_secs(300),
        }
    }
}
