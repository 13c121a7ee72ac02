//! Retry decisions and backoff.
//!
//! A [`RetryPolicy`] is a pure decision function over one transport outcome:
//! given the error or response and the number of retries already made, it
//! says whether to resend and how long to wait first.
//!
//! # Overview
//!
//! - [`Backoff`]: Fixed, exponential or custom delay schedules
//! - [`RetryEligibility`]: Which outcomes may be retried at all
//! - [`DefaultEligibility`]: Timeouts, 5xx responses and connectivity failures
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use switchyard_client::RetryPolicy;
//!
//! let policy = RetryPolicy::exponential(2.0, Duration::from_secs(60)).max_attempts(5);
//! assert_eq!(policy.delay(0), Duration::from_secs(1));
//! assert_eq!(policy.delay(5), Duration::from_secs(32));
//! ```
//!
//! # Eligibility
//!
//! The default rules are checked in order; the first match wins:
//! 1. an auth-expired error is never retried
//! 2. a timeout is retried
//! 3. a 5xx response is retried
//! 4. a connectivity failure (refused, DNS, lost connection, no network, TLS) is retried
//! 5. nothing else is retried

use std::sync::Arc;
use std::time::Duration;

use switchyard_core::ErrorKind;

use crate::request::WireRequest;
use crate::response::RawResponse;
use crate::ClientError;

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default maximum number of retries (not counting the first send).
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Default exponential base, in seconds.
    pub const BASE: f64 = 2.0;

    /// Default upper bound for a single delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(60);

    /// Default jitter ratio. Zero keeps delays exact.
    pub const JITTER: f64 = 0.0;
}

/// Decides whether an outcome may be retried at all.
///
/// Any `Fn(Option<&ClientError>, &WireRequest, Option<&RawResponse>) -> bool`
/// implements this trait.
pub trait RetryEligibility: Send + Sync + 'static {
    /// Returns whether the outcome is eligible for a retry.
    fn is_eligible(
        &self,
        error: Option<&ClientError>,
        request: &WireRequest,
        response: Option<&RawResponse>,
    ) -> bool;
}

impl<F> RetryEligibility for F
where
    F: Fn(Option<&ClientError>, &WireRequest, Option<&RawResponse>) -> bool
        + Send
        + Sync
        + 'static,
{
    fn is_eligible(
        &self,
        error: Option<&ClientError>,
        request: &WireRequest,
        response: Option<&RawResponse>,
    ) -> bool {
        self(error, request, response)
    }
}

/// The default eligibility rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEligibility;

impl RetryEligibility for DefaultEligibility {
    fn is_eligible(
        &self,
        error: Option<&ClientError>,
        _request: &WireRequest,
        response: Option<&RawResponse>,
    ) -> bool {
        if let Some(err) = error {
            match err.kind() {
                ErrorKind::AuthExpired => return false,
                ErrorKind::Timeout => return true,
                _ => {}
            }
        }
        if let Some(resp) = response {
            if resp.status.is_server_error() {
                return true;
            }
        }
        error.is_some_and(ClientError::is_connectivity)
    }
}

/// Delay schedule between retries.
#[derive(Clone)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),
    /// `min(base^attempt, cap)` seconds.
    Exponential { base: f64, cap: Duration },
    /// A caller-supplied schedule keyed by the zero-based retry count.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    fn raw_delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, cap } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = base.powi(exponent);
                if !secs.is_finite() || secs >= cap.as_secs_f64() {
                    *cap
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
            Backoff::Custom(f) => f(attempt),
        }
    }

    fn cap(&self) -> Option<Duration> {
        match self {
            Backoff::Exponential { cap, .. } => Some(*cap),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backoff::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Backoff::Exponential { base, cap } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("cap", cap)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Configuration for retry behavior.
///
/// Policies are immutable once built and cheap to clone; one policy is
/// typically shared by every request of a client.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff`: exponential, base 2.0, capped at 60 seconds
/// - `jitter`: 0.0
/// - `eligibility`: [`DefaultEligibility`]
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jitter: f64,
    eligibility: Arc<dyn RetryEligibility>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff: Backoff::Exponential {
                base: defaults::BASE,
                cap: defaults::MAX_DELAY,
            },
            jitter: defaults::JITTER,
            eligibility: Arc::new(DefaultEligibility),
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retry policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Create a policy that waits `delay` before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(delay),
            ..Default::default()
        }
    }

    /// Create a policy whose n-th retry waits `min(base^n, cap)` seconds.
    pub fn exponential(base: f64, cap: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential { base, cap },
            ..Default::default()
        }
    }

    /// Create a policy with a caller-supplied delay schedule.
    pub fn custom<F>(schedule: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            backoff: Backoff::Custom(Arc::new(schedule)),
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Replace the eligibility rules.
    pub fn eligibility(mut self, eligibility: impl RetryEligibility) -> Self {
        self.eligibility = Arc::new(eligibility);
        self
    }

    /// Set the jitter ratio.
    ///
    /// A ratio of 0.2 spreads each delay uniformly within +/- 20%. The
    /// exponential cap still applies after jitter.
    ///
    /// # Panics
    ///
    /// Panics if `jitter` is not between 0.0 and 1.0.
    pub fn jitter(mut self, jitter: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&jitter),
            "jitter must be between 0.0 and 1.0"
        );
        self.jitter = jitter;
        self
    }

    /// Get the maximum number of retries.
    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0");
        }
        if let Backoff::Exponential { base, .. } = self.backoff {
            if !base.is_finite() || base <= 0.0 {
                return Err("exponential base must be a positive number");
            }
        }
        Ok(())
    }

    /// Decide whether to retry after the `attempt`-th retry (zero-based).
    ///
    /// Always false once `attempt` reaches `max_attempts`, whatever the
    /// eligibility rules say.
    pub fn should_retry(
        &self,
        error: Option<&ClientError>,
        request: &WireRequest,
        response: Option<&RawResponse>,
        attempt: u32,
    ) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.eligibility.is_eligible(error, request, response)
    }

    /// The delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff.raw_delay(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        // delay * (1 + jitter * random(-1, 1))
        let secs = delay.as_secs_f64();
        let random_factor = rand::random::<f64>() * self.jitter * 2.0 - self.jitter;
        let mut jittered = secs * (1.0 + random_factor);
        if let Some(cap) = self.backoff.cap() {
            jittered = jittered.min(cap.as_secs_f64());
        }
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::wire_request;
    use http::{Method, StatusCode};
    use switchyard_core::{TransportError, TransportErrorKind};

    fn request() -> WireRequest {
        wire_request(Method::GET, "https://x.test/")
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.get_max_attempts(), 3);
        assert!(matches!(
            policy.backoff(),
            Backoff::Exponential { base, cap } if (*base - 2.0).abs() < f64::EPSILON && *cap == Duration::from_secs(60)
        ));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_exponential_delay_values() {
        let policy = RetryPolicy::exponential(2.0, Duration::from_secs(60));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(5), Duration::from_secs(32));

        let capped = RetryPolicy::exponential(2.0, Duration::from_secs(10));
        assert_eq!(capped.delay(5), Duration::from_secs(10));
        assert_eq!(capped.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_fixed_delay_values() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1500));
        for attempt in [0, 1, 7, 100] {
            assert_eq!(policy.delay(attempt), Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_custom_delay_values() {
        let policy = RetryPolicy::custom(|attempt| Duration::from_millis(100 * (attempt as u64 + 1)));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_range_and_cap() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1)).jitter(0.2);
        for _ in 0..50 {
            let delay = policy.delay(0);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }

        let capped = RetryPolicy::exponential(2.0, Duration::from_secs(4)).jitter(0.5);
        for _ in 0..50 {
            assert!(capped.delay(10) <= Duration::from_secs(4));
        }
    }

    #[test]
    #[should_panic(expected = "jitter must be between 0.0 and 1.0")]
    fn test_retry_policy_invalid_jitter() {
        RetryPolicy::new().jitter(1.5);
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        let policy = RetryPolicy::exponential(0.0, Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::fixed(Duration::ZERO).max_attempts(2);
        let timeout = ClientError::from(TransportError::timeout("slow"));
        let req = request();

        assert!(policy.should_retry(Some(&timeout), &req, None, 0));
        assert!(policy.should_retry(Some(&timeout), &req, None, 1));
        assert!(!policy.should_retry(Some(&timeout), &req, None, 2));
        assert!(!RetryPolicy::no_retry().should_retry(Some(&timeout), &req, None, 0));
    }

    #[test]
    fn test_default_eligibility() {
        let policy = RetryPolicy::default();
        let req = request();

        assert!(!policy.should_retry(Some(&ClientError::AuthExpired), &req, None, 0));
        assert!(policy.should_retry(
            Some(&ClientError::Timeout(Duration::from_secs(1))),
            &req,
            None,
            0
        ));

        let unavailable = RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(policy.should_retry(None, &req, Some(&unavailable), 0));

        let not_found = RawResponse::new(StatusCode::NOT_FOUND, "");
        assert!(!policy.should_retry(None, &req, Some(&not_found), 0));

        for kind in [
            TransportErrorKind::ConnectionRefused,
            TransportErrorKind::Dns,
            TransportErrorKind::ConnectionLost,
            TransportErrorKind::NoNetwork,
            TransportErrorKind::Tls,
        ] {
            let err = ClientError::from(TransportError::new(kind, "down"));
            assert!(policy.should_retry(Some(&err), &req, None, 0), "{kind}");
        }

        let other = ClientError::from(TransportError::other("weird"));
        assert!(!policy.should_retry(Some(&other), &req, None, 0));
        assert!(!policy.should_retry(Some(&ClientError::Decode("x".into())), &req, None, 0));
    }

    #[test]
    fn test_closure_eligibility() {
        let policy = RetryPolicy::fixed(Duration::ZERO).eligibility(
            |_: Option<&ClientError>, req: &WireRequest, resp: Option<&RawResponse>| {
                req.method == Method::GET && resp.is_some_and(|r| r.status == StatusCode::TOO_MANY_REQUESTS)
            },
        );
        let req = request();
        let limited = RawResponse::new(StatusCode::TOO_MANY_REQUESTS, "");
        let unavailable = RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, "");

        assert!(policy.should_retry(None, &req, Some(&limited), 0));
        assert!(!policy.should_retry(None, &req, Some(&unavailable), 0));
    }
}
