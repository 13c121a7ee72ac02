//! Retry configuration.
//!
//! This module contains the per-client and per-request retry settings:
//! - [`RetryPolicy`]: How often to resend and how long to wait
//! - [`Backoff`]: The delay schedule
//! - [`RetryEligibility`]: Which outcomes may be resent

mod retry;

pub use retry::{Backoff, DefaultEligibility, RetryEligibility, RetryPolicy, defaults};
