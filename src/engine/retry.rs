//! Retry wrapper around a single action invocation.
//!
//! Recoverable errors are re-attempted with configurable backoff until the
//! retry budget is spent, at which point a non-recoverable
//! `retry-exhausted` error embedding the attempt count and last underlying
//! error is raised. Backoff sleeps are cancellation-aware.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

/// Retry budget and backoff shape for action invocations. The engine
/// default applies to every action node; a node may override it through
/// the `retry` key of its config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    200
}
fn default_backoff() -> BackoffStrategy {
    BackoffStrategy::Exponential
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff: default_backoff(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; the first failure is final.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn delay_ms(&self, retry: u32) -> u64 {
        let base = self.initial_delay_ms;
        let delay = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                (base as f64 * self.multiplier.powi(retry as i32)) as u64
            }
            BackoffStrategy::ExponentialWithJitter => {
                let raw = base as f64 * self.multiplier.powi(retry as i32);
                let jitter = rand::random::<f64>() * raw * 0.1;
                (raw + jitter) as u64
            }
        };
        delay.min(self.max_delay_ms)
    }
}

/// Result of a retried invocation plus the number of retries performed.
pub struct RetryOutcome<T> {
    pub result: EngineResult<T>,
    pub retries: u32,
}

/// Invoke `op` under the policy. `op` receives the attempt number
/// (0-based). `on_backoff` fires before each backoff sleep so the caller
/// can surface the transient retrying state.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_backoff: impl FnMut(u32),
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut retries: u32 = 0;
    loop {
        match op(retries).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    retries,
                }
            }
            Err(err) if !err.is_recoverable() => {
                return RetryOutcome {
                    result: Err(err),
                    retries,
                }
            }
            Err(err) => {
                if retries >= policy.max_retries {
                    return RetryOutcome {
                        result: Err(EngineError::retry_exhausted(retries, &err)),
                        retries,
                    };
                }
                let delay = policy.delay_ms(retries);
                tracing::warn!(
                    retry = retries + 1,
                    delay_ms = delay,
                    error = %err,
                    "recoverable action failure; backing off"
                );
                on_backoff(retries + 1);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return RetryOutcome {
                            result: Err(EngineError::cancelled()),
                            retries,
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
                retries += 1;
            }
        }
    }
}
