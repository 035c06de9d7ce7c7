//! Fixed-attempt, fixed-backoff connect policy.
//!
//! Both the scanner connection (TCP) and the output forwarder (serial) connect
//! through [`RetryPolicy::run`]. The policy makes at most `max_attempts`
//! connect calls, pausing `backoff` between consecutive attempts, so a full
//! failure costs `max_attempts - 1` pauses. Every failed attempt is reported
//! to a callback; the last one is flagged terminal.
//!
//! # Examples
//!
//! ```
//! use scanbridge_core::RetryPolicy;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let policy = RetryPolicy::default().with_backoff(Duration::ZERO);
//! let cancel = CancellationToken::new();
//!
//! let (value, attempt) = policy
//!     .run(
//!         &cancel,
//!         |attempt| async move { if attempt < 2 { Err("refused") } else { Ok(42) } },
//!         |_failure| std::future::ready(()),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!((value, attempt), (42, 2));
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{CONNECT_BACKOFF_SECS, CONNECT_MAX_ATTEMPTS};

/// Connect retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first.
    pub max_attempts: u32,

    /// Pause between two consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CONNECT_MAX_ATTEMPTS,
            backoff: Duration::from_secs(CONNECT_BACKOFF_SECS),
        }
    }
}

/// One failed connect attempt, as reported to the failure callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,

    pub max_attempts: u32,

    /// `true` when no further attempt follows.
    pub terminal: bool,

    /// Rendered connect error.
    pub cause: String,
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Error, Debug)]
pub enum RetryError<E: fmt::Display + fmt::Debug> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("cancelled")]
    Cancelled,
}

impl<E: fmt::Display + fmt::Debug> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `connect` until it succeeds, the attempt budget is spent, or
    /// `cancel` fires.
    ///
    /// `connect` receives the 1-based attempt number. On success the value and
    /// the attempt that produced it are returned. Each failure is passed to
    /// `on_failure` before the backoff pause (or before giving up). Both the
    /// connect call and the pause race against `cancel`.
    ///
    /// # Errors
    /// `RetryError::Exhausted` with the last connect error once every attempt
    /// failed, `RetryError::Cancelled` if the token fired first.
    pub async fn run<T, E, F, Fut, N, NFut>(
        &self,
        cancel: &CancellationToken,
        mut connect: F,
        mut on_failure: N,
    ) -> Result<(T, u32), RetryError<E>>
    where
        E: fmt::Display + fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        N: FnMut(AttemptFailure) -> NFut,
        NFut: Future<Output = ()>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "Connect attempt");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = connect(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            let terminal = attempt >= max_attempts;
            warn!(attempt, max_attempts, terminal, error = %error, "Connect attempt failed");

            on_failure(AttemptFailure {
                attempt,
                max_attempts,
                terminal,
                cause: error.to_string(),
            })
            .await;

            if terminal {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }

            attempt += 1;
        }
    }
}
