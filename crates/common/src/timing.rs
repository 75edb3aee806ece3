//! Timing primitives: jittered sleeps, bounded polling and timeouts
//!
//! Every wait the pipeline performs goes through this module so that it is
//! either bounded by an explicit timeout or by an attempt cap.

use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Fraction by which sleeps are randomly stretched or shortened.
pub const JITTER: f64 = 0.1;

/// Pick a duration uniformly within ±10% of `nominal`.
pub fn jittered(nominal: Duration) -> Duration {
    let nominal_ms = nominal.as_secs_f64() * 1000.0;
    if nominal_ms <= 0.0 {
        return Duration::ZERO;
    }
    let low = nominal_ms * (1.0 - JITTER);
    let high = nominal_ms * (1.0 + JITTER);
    let ms = rand::thread_rng().gen_range(low..=high);
    Duration::from_secs_f64(ms / 1000.0)
}

/// Sleep for roughly `nominal`, jittered.
pub async fn delay(nominal: Duration) {
    let actual = jittered(nominal);
    trace!("Sleeping for {:?} (nominal {:?})", actual, nominal);
    tokio::time::sleep(actual).await;
}

/// Run `fut` with a hard deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, limit)),
    }
}

/// Attempt cap and spacing for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(250),
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Call `check` until it reports `true`.
///
/// Gives up with [`Error::RetriesExhausted`] once `policy.max_attempts` checks
/// have come back `false`. Errors from `check` propagate immediately.
pub async fn poll_until<F, Fut>(operation: &str, policy: PollPolicy, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut attempts = 0;
    loop {
        if check().await? {
            return Ok(());
        }
        attempts += 1;
        if attempts >= policy.max_attempts {
            return Err(Error::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
            });
        }
        trace!("{}: attempt {} failed, retrying", operation, attempts);
        delay(policy.interval).await;
    }
}
