//! Password-reset dispatch with retries.

use std::future::Future;
use std::time::Duration;

use crate::error::IdentityError;
use crate::session::AuthProviderError;

/// Retry policy for password-reset emails.
///
/// After failed attempt `n` (1-based) the next attempt waits
/// `base_delay * 2^n`: with the defaults, 2 s then 4 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ResetPolicy {
    /// Wait before the attempt following failed attempt `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Progress of a single reset submission.
#[derive(Debug, Clone, Default)]
pub struct ResetRetryState {
    /// Failed attempts so far.
    pub attempt: u32,
    pub last_error: Option<AuthProviderError>,
}

impl ResetRetryState {
    pub fn record_failure(&mut self, err: AuthProviderError) {
        self.attempt += 1;
        self.last_error = Some(err);
    }
}

/// Run `dispatch` until it succeeds, a non-transient error comes back, or
/// the policy's attempts are used up.
///
/// Returns the number of attempts made.
///
/// # Errors
///
/// Returns `IdentityError::ResetDelivery` carrying the last provider error.
pub async fn dispatch_with_retry<F, Fut>(
    policy: &ResetPolicy,
    mut dispatch: F,
) -> Result<u32, IdentityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AuthProviderError>>,
{
    let mut state = ResetRetryState::default();
    let max_retries = policy.max_retries.max(1);

    loop {
        match dispatch().await {
            Ok(()) => return Ok(state.attempt + 1),
            Err(err) => {
                let transient = err.is_transient();
                state.record_failure(err.clone());
                let attempt = state.attempt;

                if !transient || attempt >= max_retries {
                    tracing::warn!(
                        attempts = attempt,
                        transient,
                        "Password reset dispatch gave up"
                    );
                    return Err(IdentityError::ResetDelivery {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Password reset dispatch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
