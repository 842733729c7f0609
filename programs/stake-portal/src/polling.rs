//! Cancellable retry loop shared by the client-side pollers.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    /// Wait between attempts while the resource is still pending.
    pub base_delay: Duration,
    /// Ceiling for the backoff after transient failures.
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// `base_delay * 2^failures`, capped at `max_delay`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending,
}

/// How a failed attempt should be treated.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth retrying after a backoff (rate limits, 5xx, network).
    Transient(E),
    /// Retrying cannot help (not found, forbidden).
    Fatal(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    #[error("polling cancelled")]
    Cancelled,
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last_error: Option<E> },
    #[error("polling stopped")]
    Fatal(E),
}

/// Owner side of a cancellation pair. Cancels on [`CancelHandle::cancel`]
/// or when dropped.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

#[derive(Clone, Debug)]
pub struct CancelToken(watch::Receiver<bool>);

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        let _ = self.0.send(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once cancelled.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Runs `attempt` until it yields [`PollOutcome::Ready`], fails fatally,
/// runs out of attempts or `cancel` fires.
///
/// Pending results wait `base_delay`; transient failures back off
/// exponentially. A pending result resets the failure count.
pub async fn poll_with_backoff<T, E, F, Fut>(
    policy: PollPolicy,
    mut cancel: CancelToken,
    mut attempt: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollOutcome<T>, AttemptError<E>>>,
{
    let mut failures = 0u32;
    let mut last_error = None;
    for n in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        let delay = match attempt(n).await {
            Ok(PollOutcome::Ready(value)) => return Ok(value),
            Ok(PollOutcome::Pending) => {
                failures = 0;
                policy.base_delay
            }
            Err(AttemptError::Fatal(err)) => return Err(PollError::Fatal(err)),
            Err(AttemptError::Transient(err)) => {
                failures = failures.saturating_add(1);
                last_error = Some(err);
                policy.backoff(failures)
            }
        };
        if n + 1 == policy.max_attempts {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
