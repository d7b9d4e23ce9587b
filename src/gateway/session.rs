use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error};

use super::{
    auth::ClockSync,
    errors::{GatewayError, Result},
};

pub const DEFAULT_RETRY_INCREMENT_MS: u64 = 200;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 20_000;
const JITTER_MS: i64 = 100;

/// Backoff applied while another caller holds the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusyRetryPolicy {
    pub increment: Duration,
    pub timeout: Duration,
}

impl Default for BusyRetryPolicy {
    fn default() -> Self {
        Self {
            increment: Duration::from_millis(DEFAULT_RETRY_INCREMENT_MS),
            timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl BusyRetryPolicy {
    pub fn new(increment: Duration, timeout: Duration) -> Self {
        Self { increment, timeout }
    }

    /// `attempt * increment + jitter`, never negative.
    pub fn delay(&self, attempt: u32, jitter_ms: i64) -> Duration {
        let base = self.increment.as_millis() as i64 * attempt as i64;
        Duration::from_millis((base + jitter_ms).max(0) as u64)
    }
}

/// Process-wide state of one exchange account: the single-flight flag and
/// the exchange clock offset.
///
/// The flag is a mutual-exclusion flag, not a queue: waiters poll with
/// jittered backoff and whoever observes it free first wins.
#[derive(Debug, Default)]
pub struct GatewaySession {
    busy: AtomicBool,
    calls: AtomicU64,
    clock: ClockSync,
}

impl GatewaySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Discovered offset between the exchange clock and ours, if known.
    pub async fn clock_offset(&self) -> Option<i64> {
        self.clock.offset().await
    }

    pub(crate) fn clock(&self) -> &ClockSync {
        &self.clock
    }

    /// Number of guards handed out so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                self.calls.fetch_add(1, Ordering::Relaxed);
                BusyGuard { session: self }
            })
    }

    pub async fn acquire(
        &self,
        operation: &'static str,
        policy: &BusyRetryPolicy,
    ) -> Result<BusyGuard<'_>> {
        if let Some(guard) = self.try_acquire() {
            return Ok(guard);
        }

        debug!(operation, "exchange busy, another call is being processed");
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let jitter = rand::thread_rng().gen_range(-JITTER_MS..=JITTER_MS);
            let delay = policy.delay(attempt, jitter);
            debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "retrying busy exchange");
            sleep(delay).await;

            if let Some(guard) = self.try_acquire() {
                debug!(operation, attempt, "exchange free, executing");
                return Ok(guard);
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                error!(operation, attempt, "exchange busy for too long, giving up");
                return Err(GatewayError::BusyTimeout {
                    operation,
                    attempts: attempt,
                    waited_ms: waited.as_millis() as u64,
                });
            }
        }
    }
}

/// Held for the duration of one network call; frees the session on drop.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    session: &'a GatewaySession,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::Release);
    }
}
