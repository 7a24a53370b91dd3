//! Pure lockout decision logic.
//!
//! [`LockoutPolicy`] never reads or writes storage. It answers two questions:
//! given a counter and the current time, may an attempt proceed; and given a
//! post-increment failure count, does this failure lock or block. Stores call
//! the second half from inside their per-key critical section so a lock is
//! visible to the very next request.

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::ProtectionConfig,
    storage::{AccountCounter, AddressCounter},
};

/// Result of evaluating an account counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountVerdict {
    Allowed,
    /// The account is suspended for `remaining` more time.
    Locked { remaining: Duration },
    /// A lock was set but has elapsed. The caller clears it and resets the count.
    LockExpired,
}

/// Result of evaluating an address counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressVerdict {
    Allowed,
    Blocked,
    /// Only reachable when a block duration is configured.
    BlockExpired,
}

/// Thresholds and durations that drive every lockout decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub account_threshold: u32,
    pub account_lock_duration: Duration,
    pub account_failure_window: Option<Duration>,
    pub address_threshold: u32,
    pub address_block_duration: Option<Duration>,
    pub address_failure_window: Option<Duration>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from(&ProtectionConfig::default())
    }
}

impl From<&ProtectionConfig> for LockoutPolicy {
    fn from(config: &ProtectionConfig) -> Self {
        Self {
            account_threshold: config.account_threshold,
            account_lock_duration: config.account_lock_duration,
            account_failure_window: config.account_failure_window,
            address_threshold: config.address_threshold,
            address_block_duration: config.address_block_duration,
            address_failure_window: config.address_failure_window,
        }
    }
}

impl LockoutPolicy {
    pub fn evaluate_account(&self, counter: &AccountCounter, now: DateTime<Utc>) -> AccountVerdict {
        match counter.locked_until {
            Some(until) if now < until => AccountVerdict::Locked {
                remaining: until - now,
            },
            Some(_) => AccountVerdict::LockExpired,
            None => AccountVerdict::Allowed,
        }
    }

    pub fn evaluate_address(&self, counter: &AddressCounter, now: DateTime<Utc>) -> AddressVerdict {
        if !counter.blocked {
            return AddressVerdict::Allowed;
        }

        match counter.blocked_until {
            Some(until) if now >= until => AddressVerdict::BlockExpired,
            _ => AddressVerdict::Blocked,
        }
    }

    pub fn should_lock_account(&self, failed_count: u32) -> bool {
        failed_count >= self.account_threshold
    }

    pub fn should_block_address(&self, failed_count: u32) -> bool {
        failed_count >= self.address_threshold
    }

    pub fn account_lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.account_lock_duration
    }

    /// `None` means the block never expires on its own.
    pub fn address_block_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.address_block_duration.map(|duration| now + duration)
    }

    /// True when the previous failure is older than the account failure window.
    pub fn account_window_elapsed(
        &self,
        last_failure_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        window_elapsed(self.account_failure_window, last_failure_at, now)
    }

    /// True when the previous failure is older than the address failure window.
    pub fn address_window_elapsed(
        &self,
        last_failure_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        window_elapsed(self.address_failure_window, last_failure_at, now)
    }
}

fn window_elapsed(
    window: Option<Duration>,
    last_failure_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match (window, last_failure_at) {
        (Some(window), Some(last)) => now - last > window,
        _ => false,
    }
}
