//! Configuration for brute force protection.

use chrono::Duration;

use crate::error::ValidationError;

/// Configuration for account lockout and address blocking.
///
/// The defaults follow the published login policy: five failed attempts suspend
/// an account for 15 minutes, and one hundred failed attempts from one network
/// address block that address until an operator resets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionConfig {
    /// Master switch. When disabled every attempt is allowed and nothing is recorded.
    pub enabled: bool,

    /// Consecutive failures that suspend an account.
    pub account_threshold: u32,

    /// How long a suspended account stays locked.
    pub account_lock_duration: Duration,

    /// Failures older than this no longer count toward the account threshold.
    /// `None` counts every failure since the last reset.
    pub account_failure_window: Option<Duration>,

    /// Failures from one address that block it.
    pub address_threshold: u32,

    /// How long an address block lasts. `None` blocks until an administrative reset.
    pub address_block_duration: Option<Duration>,

    /// Failures older than this no longer count toward the address threshold.
    pub address_failure_window: Option<Duration>,

    /// Idle counters older than this are evicted by the cleanup task.
    pub retention_period: Duration,

    /// How often the cleanup task runs.
    pub cleanup_interval: std::time::Duration,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            account_threshold: 5,
            account_lock_duration: Duration::minutes(15),
            account_failure_window: None,
            address_threshold: 100,
            address_block_duration: None,
            address_failure_window: None,
            retention_period: Duration::days(7),
            cleanup_interval: std::time::Duration::from_secs(3600),
        }
    }
}

impl ProtectionConfig {
    /// A configuration with protection switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_account_threshold(mut self, threshold: u32) -> Self {
        self.account_threshold = threshold;
        self
    }

    pub fn with_account_lock_duration(mut self, duration: Duration) -> Self {
        self.account_lock_duration = duration;
        self
    }

    pub fn with_account_failure_window(mut self, window: Option<Duration>) -> Self {
        self.account_failure_window = window;
        self
    }

    pub fn with_address_threshold(mut self, threshold: u32) -> Self {
        self.address_threshold = threshold;
        self
    }

    pub fn with_address_block_duration(mut self, duration: Option<Duration>) -> Self {
        self.address_block_duration = duration;
        self
    }

    pub fn with_address_failure_window(mut self, window: Option<Duration>) -> Self {
        self.address_failure_window = window;
        self
    }

    pub fn with_retention_period(mut self, retention: Duration) -> Self {
        self.retention_period = retention;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Reject configurations that could never lock an account or that would
    /// evict failures before they stop counting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.account_threshold == 0 {
            return Err(ValidationError::InvalidField(
                "account_threshold must be at least 1".to_string(),
            ));
        }
        if self.address_threshold == 0 {
            return Err(ValidationError::InvalidField(
                "address_threshold must be at least 1".to_string(),
            ));
        }
        if self.account_lock_duration <= Duration::zero() {
            return Err(ValidationError::InvalidField(
                "account_lock_duration must be positive".to_string(),
            ));
        }
        let positive = |d: Option<Duration>| d.is_none_or(|d| d > Duration::zero());
        if !positive(self.address_block_duration)
            || !positive(self.account_failure_window)
            || !positive(self.address_failure_window)
        {
            return Err(ValidationError::InvalidField(
                "configured durations and windows must be positive".to_string(),
            ));
        }
        if self.retention_period <= Duration::zero() {
            return Err(ValidationError::InvalidField(
                "retention_period must be positive".to_string(),
            ));
        }
        let outlives = |window: Option<Duration>| window.is_none_or(|w| self.retention_period >= w);
        if !outlives(self.account_failure_window) || !outlives(self.address_failure_window) {
            return Err(ValidationError::InvalidField(
                "retention_period must cover the failure windows".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ValidationError::InvalidField(
                "cleanup_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
