//! Exponential back-off retry for calls against the local hypervisor socket.

use crate::error::{NetctlError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Back-off schedule with a hard elapsed-time ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Delays are drawn from `interval * (1 ± randomization_factor)`
    pub randomization_factor: f64,
    pub max_interval: Duration,
    /// No retry starts after this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// Policy for local connections, giving up after `max_elapsed`.
    pub fn local(max_elapsed: Duration) -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            multiplier: 1.25,
            randomization_factor: 0.25,
            max_interval: Duration::from_secs(5),
            max_elapsed,
        }
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.randomization_factor <= 0.0 {
            return interval;
        }
        let base = interval.as_secs_f64();
        let delta = base * self.randomization_factor;
        let secs = rand::thread_rng().gen_range((base - delta).max(0.0)..=base + delta);
        Duration::from_secs_f64(secs)
    }

    fn next_interval(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier).min(self.max_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::local(Duration::from_secs(10))
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// Only [`NetctlError::is_transient`] failures are retried.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        let delay = policy.jittered(interval);
        if start.elapsed() + delay > policy.max_elapsed {
            return Err(NetctlError::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
                source: Box::new(err),
            });
        }

        info!("will retry after {:?}: {}", delay, err);
        metrics::counter!("netctl_retries_total", "operation" => operation.to_string()).increment(1);
        tokio::time::sleep(delay).await;
        interval = policy.next_interval(interval);
    }
}
