//! Restartable retry loop.
//!
//! [`RetryLoop`] hands out [`RetryAttempt`]s until either the attempt count or
//! the time budget runs out, sleeping a [`Backoff`]-computed delay between
//! attempts. A consumer that wants the next attempt right away (e.g. after a
//! successful re-authentication) sets [`RetryAttempt::skip_sleep`].
//!
//! ```ignore
//! let mut retry = RetryLoop::new(Some(3), None);
//! while let Some(attempt) = retry.next().await {
//!     if try_once(attempt.attempt).await.is_ok() {
//!         break;
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Hard ceiling of a single inter-attempt sleep.
pub const MAX_SLEEP: Duration = Duration::from_secs(10);

/// Computes how long to wait after attempt `attempt` (0-based) failed.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `random[0, 1.5) + 1.5^(attempt - 1)` seconds, capped at `max`.
///
/// The first retry waits between ~0.67s and ~2.17s; later ones grow
/// exponentially until the cap.
#[derive(Clone, Copy, Debug)]
pub struct JitteredBackoff {
    pub max: Duration,
}

impl Default for JitteredBackoff {
    fn default() -> Self {
        Self { max: MAX_SLEEP }
    }
}

impl Backoff for JitteredBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.0..1.5);
        let exp = attempt.min(i32::MAX as u32) as i32 - 1;
        let secs = jitter + 1.5f64.powi(exp);
        let max_secs = self.max.as_secs_f64();
        if !secs.is_finite() || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Constant delay, mostly useful in tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// One iteration of a [`RetryLoop`].
#[derive(Debug)]
pub struct RetryAttempt {
    /// Zero-based attempt index.
    pub attempt: u32,
    /// Time left in the budget when the attempt started; `None` if unbounded.
    pub remaining: Option<Duration>,
    /// Set to run the next attempt without sleeping.
    pub skip_sleep: bool,
}

enum Budget {
    Unbounded,
    Left(Duration),
    Expired,
}

pub struct RetryLoop {
    max_attempts: Option<u32>,
    timeout: Option<Duration>,
    start: Instant,
    backoff: Arc<dyn Backoff>,
    current: Option<RetryAttempt>,
    issued: u32,
}

impl RetryLoop {
    /// `None` or zero for either bound means "no limit"; with both unset the
    /// loop never ends on its own.
    pub fn new(max_attempts: Option<u32>, timeout: Option<Duration>) -> Self {
        Self::with_backoff(max_attempts, timeout, Arc::new(JitteredBackoff::default()))
    }

    pub fn with_backoff(
        max_attempts: Option<u32>,
        timeout: Option<Duration>,
        backoff: Arc<dyn Backoff>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.filter(|n| *n > 0),
            timeout: timeout.filter(|t| !t.is_zero()),
            start: Instant::now(),
            backoff,
            current: None,
            issued: 0,
        }
    }

    /// Number of attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.issued
    }

    /// Waits as needed and returns the next attempt, or `None` once the
    /// attempt count or the time budget is used up.
    pub async fn next(&mut self) -> Option<&mut RetryAttempt> {
        if let Some(prev) = self.current.take() {
            if self.is_last(prev.attempt) {
                return None;
            }
            if !prev.skip_sleep {
                let mut delay = self.backoff.delay(prev.attempt);
                match self.budget() {
                    Budget::Expired => return None,
                    Budget::Left(left) => delay = delay.min(left),
                    Budget::Unbounded => {}
                }
                tracing::trace!(
                    target: "taskbot.net",
                    attempt = prev.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "sleeping before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        if self.max_attempts.is_some_and(|max| self.issued >= max) {
            return None;
        }
        let remaining = match self.budget() {
            Budget::Expired => return None,
            Budget::Left(left) => Some(left),
            Budget::Unbounded => None,
        };

        let attempt = RetryAttempt {
            attempt: self.issued,
            remaining,
            skip_sleep: false,
        };
        self.issued += 1;
        self.current = Some(attempt);
        self.current.as_mut()
    }

    fn is_last(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt + 1 >= max)
    }

    fn budget(&self) -> Budget {
        let Some(timeout) = self.timeout else {
            return Budget::Unbounded;
        };
        let elapsed = self.start.elapsed();
        if elapsed >= timeout {
            Budget::Expired
        } else {
            Budget::Left(timeout - elapsed)
        }
    }
}
