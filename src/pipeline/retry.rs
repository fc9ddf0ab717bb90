use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Filter, Pipe};
use crate::context::PipeContext;
use crate::error::BusError;

type RetryPredicate = Arc<dyn Fn(&BusError) -> bool + Send + Sync>;

/// How many times, and how far apart, a failing pipe is re-invoked.
///
/// Immediate and interval retry are the same policy with different
/// intervals: an empty interval list means no delay between attempts.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    limit: u32,
    intervals: Vec<Duration>,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `limit` times without delay.
    pub fn immediate(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Retry up to `limit` times, waiting `interval` before each retry.
    pub fn interval(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            intervals: vec![interval],
            predicate: None,
        }
    }

    /// One retry per interval, waiting the given interval before each.
    pub fn intervals(intervals: Vec<Duration>) -> Self {
        Self {
            limit: intervals.len() as u32,
            intervals,
            predicate: None,
        }
    }

    /// Only retry errors for which `predicate` returns `true`.
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BusError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Delay before retry number `retry` (1-based). The last interval repeats.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let index = retry.saturating_sub(1) as usize;
        self.intervals
            .get(index)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether retry number `retry` (1-based) should run after `error`.
    pub fn should_retry(&self, error: &BusError, retry: u32) -> bool {
        if retry > self.limit || matches!(error, BusError::Cancelled) {
            return false;
        }
        self.predicate.as_ref().map_or(true, |accept| accept(error))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limit", &self.limit)
            .field("intervals", &self.intervals)
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

/// Re-invokes the rest of the chain while the policy allows.
///
/// The context's retry attempt is updated before each invocation. A delay is
/// abandoned when the context is cancelled and the last error is returned.
#[derive(Debug, Clone)]
pub struct RetryFilter {
    policy: RetryPolicy,
}

impl RetryFilter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl<C: PipeContext + 'static> Filter<C> for RetryFilter {
    async fn send(&self, context: &mut C, next: &dyn Pipe<C>) -> Result<(), BusError> {
        let mut attempt = 0;
        loop {
            context.set_retry_attempt(attempt);
            let error = match next.send(context).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            attempt += 1;
            if !self.policy.should_retry(&error, attempt) {
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            debug!(
                attempt,
                limit = self.policy.limit,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying"
            );

            let cancellation = context.cancellation().clone();
            if cancellation.is_cancelled() {
                return Err(error);
            }
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancellation.cancelled() => return Err(error),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
