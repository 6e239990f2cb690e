//! Backoff policy for the scheduler loop
//!
//! Maps a consecutive-failure count to the delay the scheduler sleeps
//! before retrying a failed outer iteration. The policy is deliberately
//! coarse: short retries for transient glitches, escalating to hourly
//! retries when the failure persists (provider outage, dead network).

use std::time::Duration;

/// Escalating retry delays for consecutive scheduler failures.
///
/// Pure and deterministic: the same failure count always yields the
/// same delay, and the delay never decreases as failures accumulate.
pub struct BackoffPolicy;

impl BackoffPolicy {
    /// Returns how long to wait before retrying after `consecutive_errors`
    /// failed iterations.
    ///
    /// Fewer than 60 failures retry every 10 seconds (ten minutes of fast
    /// retries), fewer than 120 every minute, anything beyond that hourly.
    pub fn delay(consecutive_errors: u32) -> Duration {
        if consecutive_errors < 60 {
            Duration::from_secs(10)
        } else if consecutive_errors < 120 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(3600)
        }
    }
}
