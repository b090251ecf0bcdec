//! Support utilities for [`keen_retry`]'s retry API.
//!
//! Translation providers fail in many different ways: network errors, HTTP
//! error statuses, rate limiting, and garbage response bodies. We sort every
//! failure into one of two buckets at the call site, using
//! [`RetryResult::Transient`] or [`RetryResult::Fatal`], so that the retry
//! loop only ever has two cases to think about.

use clap::Args;
use keen_retry::RetryResult;
use reqwest::StatusCode;

/// On error, return a [`RetryResult::Transient`] value.
macro_rules! try_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use {try_potentially_transient, try_transient};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Transient`] value.
pub(crate) fn retry_result_transient<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Transient { input: (), error }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// How hard should we try before giving up on a request?
#[derive(Args, Clone, Debug)]
pub struct RetryOpts {
    /// How many times to retry a failed translation request before replacing
    /// that chunk with a placeholder.
    #[clap(long, default_value = "3")]
    pub max_retries: u8,

    /// Shortest delay between retries, in milliseconds. Delays grow
    /// exponentially (with some random jitter) up to `--max-backoff-ms`.
    #[clap(long, default_value = "1000")]
    pub min_backoff_ms: u32,

    /// Longest delay between retries, in milliseconds.
    #[clap(long, default_value = "10000")]
    pub max_backoff_ms: u32,
}

impl Default for RetryOpts {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_backoff_ms: 1000,
            max_backoff_ms: 10_000,
        }
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. The prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else if self.is_builder() || self.is_redirect() {
            // We built a bad request, or the server is redirecting us in
            // circles. Neither gets better by waiting.
            false
        } else {
            // Connection failures, timeouts and truncated bodies. `reqwest`
            // doesn't expose enough detail to be more precise, and the free
            // endpoints we talk to drop connections fairly often.
            true
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}
