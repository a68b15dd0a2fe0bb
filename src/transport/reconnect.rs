//! Exponential backoff reconnection.
//!
//! Attempt `n` (1-based) sleeps `base_delay * 2^(n-1)` before trying. With
//! `max_attempts = 3` and `base_delay = 1s` the waits are 1s, 2s and 4s,
//! after which the reconnect fails terminally.
//!
//! The loop is guarded against re-entry and stops as soon as the closing
//! flag is raised, including while it sleeps.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// Constants
// ============================================================================

/// Default reconnect ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// How often and how patiently to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles each attempt.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before 1-based attempt `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of a reconnect run.
#[derive(Debug)]
pub enum Outcome<T> {
    /// An attempt succeeded.
    Reconnected(T),
    /// Closing was requested, or another run is already in progress.
    Aborted,
    /// Every attempt failed.
    Failed {
        /// Attempts made.
        attempts: u32,
    },
}

// ============================================================================
// Backoff Loop
// ============================================================================

/// Runs the backoff loop.
///
/// `on_attempt(attempt, max)` fires before each sleep. `connect` is invoked
/// after the sleep; its error is only logged.
pub async fn run<T, E, F, Fut, N>(
    policy: &ReconnectPolicy,
    in_progress: &AtomicBool,
    closing: &mut watch::Receiver<bool>,
    mut on_attempt: N,
    mut connect: F,
) -> Outcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    N: FnMut(u32, u32),
{
    if in_progress
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Outcome::Aborted;
    }

    let outcome = backoff(policy, closing, &mut on_attempt, &mut connect).await;
    in_progress.store(false, Ordering::Release);
    outcome
}

async fn backoff<T, E, F, Fut, N>(
    policy: &ReconnectPolicy,
    closing: &mut watch::Receiver<bool>,
    on_attempt: &mut N,
    connect: &mut F,
) -> Outcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    N: FnMut(u32, u32),
{
    for attempt in 1..=policy.max_attempts {
        if *closing.borrow() {
            return Outcome::Aborted;
        }

        on_attempt(attempt, policy.max_attempts);
        let delay = policy.delay(attempt);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closing.wait_for(|c| *c) => return Outcome::Aborted,
        }

        match connect().await {
            Ok(value) => return Outcome::Reconnected(value),
            Err(e) => debug!(attempt, error = %e, "Reconnect attempt failed"),
        }
    }

    Outcome::Failed {
        attempts: policy.max_attempts,
    }
}

// ============================================================================
// Tests
// ============================================================================
