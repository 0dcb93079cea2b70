use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Largest growth factor accepted between two retries.
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
/// Upper bound on a server-requested wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Exponential backoff schedule. `max_retries` counts retries, so an
/// operation runs at most `max_retries + 1` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff,
            jitter: config.jitter,
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based). Never exceeds
    /// `max_backoff` plus jitter, whatever the multiplier.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .clamp(1.0, MAX_BACKOFF_MULTIPLIER)
            .powi(retry.min(64) as i32);
        let base = Duration::try_from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
            .map(|d| d.min(self.max_backoff))
            .unwrap_or(self.max_backoff);
        if self.jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(extra)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    label: &str,
    op: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    retry_with_floor(policy, label, op, is_retryable, |_| None).await
}

/// Like [`retry_with_backoff`], but an error may ask for a longer wait
/// (a provider's retry-after). The wait is capped at one minute.
pub async fn retry_with_floor<T, E, F, Fut, R, D>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    is_retryable: R,
    floor: D,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    D: Fn(&E) -> Option<Duration>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let requested = floor(&e).unwrap_or_default().min(MAX_RETRY_AFTER);
                let delay = policy.delay_for(attempt).max(requested);
                warn!("{} failed (attempt {}): {}; retrying in {:?}", label, attempt + 1, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} giving up after {} attempt(s)", label, attempt + 1);
                return Err(e);
            }
        }
    }
}

/// Why a scoped operation did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    Cancelled,
    Failed(E),
}

/// One retry allowance shared by every call made for a single unit of
/// work, observing a cancellation token before each attempt and during
/// each backoff sleep.
pub struct RetryScope<'a> {
    policy: &'a RetryPolicy,
    cancel: &'a CancellationToken,
    used: AtomicU32,
}

impl<'a> RetryScope<'a> {
    pub fn new(policy: &'a RetryPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            used: AtomicU32::new(0),
        }
    }

    pub fn retries_used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Claim the next retry, returning its 0-based index.
    fn claim(&self) -> Option<u32> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.policy.max_retries).then_some(used + 1)
            })
            .ok()
    }

    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, is_retryable: R) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let retry = match is_retryable(&e).then(|| self.claim()).flatten() {
                Some(retry) => retry,
                None => {
                    debug!("{} giving up after {} retries in this step: {}", label, self.retries_used(), e);
                    return Err(RetryError::Failed(e));
                }
            };
            let delay = self.policy.delay_for(retry);
            warn!(
                "{} failed: {}; retry {}/{} in {:?}",
                label,
                e,
                retry + 1,
                self.policy.max_retries,
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return Err(RetryError::Cancelled),
            }
        }
    }
}
