//! Dial retry policy

use std::time::Duration;

/// Retry policy for outbound dial attempts.
///
/// Applies only to dialing; listener accept retries immediately and is
/// not governed by this policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay between failed connect attempts
    pub interval: Duration,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Maximum number of connect attempts (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}
