//! 期限付きリトライ実行
//!
//! 試行回数上限付きの指数バックオフを、全体の期限（ウォールクロック）で包む。
//! 各試行の前に「経過時間 + 次の待機時間」が期限に達するなら、次の試行を始めずに打ち切る。
//! 実行される操作は冪等でなければならない。

use crate::error::{ContainerError, Result};
use stackflow_core::RetryPolicy;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// `operation` を `policy` に従って成功するまで繰り返す
///
/// `operation` には1始まりの試行番号が渡される。
pub async fn run_with_deadline<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let deadline = policy.deadline();
    let mut next_delay = Duration::ZERO;
    let mut last_failure: Option<String> = None;
    let mut attempts = 0;

    for attempt in 1..=policy.max_attempts() {
        let elapsed = started.elapsed();
        if elapsed >= deadline || elapsed + next_delay >= deadline {
            warn!(
                label,
                attempts,
                elapsed = ?elapsed,
                next_delay = ?next_delay,
                "Deadline reached before next attempt"
            );
            return Err(ContainerError::DeadlineExceeded {
                command: label.to_string(),
                attempts,
                elapsed,
                deadline,
                last_failure,
                snapshot: None,
            });
        }

        if !next_delay.is_zero() {
            debug!(label, attempt, delay = ?next_delay, "Waiting before retry");
            sleep(next_delay).await;
        }

        attempts = attempt;
        match operation(attempt).await {
            Ok(value) => {
                debug!(label, attempt, elapsed = ?started.elapsed(), "Attempt succeeded");
                return Ok(value);
            }
            Err(e) => {
                warn!(label, attempt, error = %e, "Attempt failed");
                last_failure = Some(e.to_string());
                next_delay = policy.delay_after(attempt);
            }
        }
    }

    Err(ContainerError::CommandFailed {
        command: label.to_string(),
        attempts,
        last_failure: last_failure.unwrap_or_default(),
        snapshot: None,
    })
}
