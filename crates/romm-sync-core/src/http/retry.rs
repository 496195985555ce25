//! Retry policy shared by catalog listings and asset downloads

use std::thread;
use std::time::Duration;

use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{Error, Result};

/// HTTP statuses that indicate a transient server-side condition
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Returns `true` if the status is worth retrying
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Bounded exponential-backoff retry policy.
///
/// Attempt `n` (1-based) that fails transiently is followed by a pause of
/// `base_delay * 2^(n-1)`. The final failure is surfaced as
/// [`Error::TransientNetwork`]; 404 becomes [`Error::NotFound`] and any
/// other non-success status becomes [`Error::HttpStatus`] without retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    retryable: fn(u16) -> bool,
}

impl RetryPolicy {
    /// Default number of attempts (including the first one)
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            retryable: is_transient_status,
        }
    }

    /// Policy for catalog listing calls (3 attempts, 2s base)
    pub fn listing() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Duration::from_secs(2))
    }

    /// Policy for image/binary downloads (3 attempts, 1s base)
    pub fn asset() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Duration::from_secs(1))
    }

    /// Replace the backoff base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Replace the retryable-status predicate
    pub fn with_retryable(mut self, retryable: fn(u16) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Perform `request`, retrying transient failures.
    pub fn send(&self, transport: &dyn HttpTransport, request: &HttpRequest) -> Result<HttpResponse> {
        let url = request.display_url();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let reason = match transport.get(request) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 404 => return Err(Error::NotFound(url)),
                Ok(response) if (self.retryable)(response.status) => {
                    format!("HTTP {}", response.status)
                }
                Ok(response) => {
                    return Err(Error::HttpStatus {
                        status: response.status,
                        url,
                    })
                }
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(Error::Other(format!("Request to {} failed: {}", url, e))),
            };

            if attempt >= self.max_attempts {
                return Err(Error::TransientNetwork {
                    url,
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.delay_for(attempt);
            tracing::debug!(
                "{} ({}), retrying in {:?} (attempt {}/{})",
                url,
                reason,
                delay,
                attempt,
                self.max_attempts
            );
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::listing()
    }
}
