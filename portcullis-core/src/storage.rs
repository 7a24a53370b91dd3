//! Counter and attempt types shared by every [`AttemptStore`](crate::repositories::AttemptStore).
//!
//! The mutation helpers on [`AccountCounter`] and [`AddressCounter`] are the
//! single definition of how a failure changes a counter. Store implementations
//! call them while holding whatever per-key exclusion their backend provides.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AccountId,
    error::ValidationError,
    policy::LockoutPolicy,
    validation::parse_address,
};

/// Failure tally for a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCounter {
    pub account: AccountId,
    pub failed_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl AccountCounter {
    /// A zero-valued counter, as returned for accounts with no recorded failures.
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            failed_count: 0,
            locked_until: None,
            last_failure_at: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Clears the failure count and any lock. `last_failure_at` is kept for eviction.
    pub fn reset(&mut self) {
        self.failed_count = 0;
        self.locked_until = None;
    }

    /// Resets the counter if its lock has elapsed. Returns whether it did.
    pub fn clear_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.locked_until.is_some_and(|until| now >= until) {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Applies one failed attempt. Returns `true` only for the failure that
    /// transitions the account into the locked state.
    ///
    /// A lock that is already in place is never extended, so racing failures
    /// past the threshold keep the original expiry.
    pub fn apply_failure(&mut self, now: DateTime<Utc>, policy: &LockoutPolicy) -> bool {
        if !self.clear_if_expired(now)
            && self.locked_until.is_none()
            && policy.account_window_elapsed(self.last_failure_at, now)
        {
            self.failed_count = 0;
        }

        self.failed_count = self.failed_count.saturating_add(1);
        self.last_failure_at = Some(latest(self.last_failure_at, now));

        if self.locked_until.is_none() && policy.should_lock_account(self.failed_count) {
            self.locked_until = Some(policy.account_lock_until(now));
            return true;
        }
        false
    }

    /// True when the counter carries no state worth keeping past `before`.
    pub fn is_idle(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        !self.is_locked_at(now) && self.last_failure_at.is_none_or(|last| last < before)
    }
}

/// Failure tally for a single source address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCounter {
    pub address: IpAddr,
    pub failed_count: u32,
    pub blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    /// Only set when a block duration is configured.
    pub blocked_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl AddressCounter {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            failed_count: 0,
            blocked: false,
            blocked_at: None,
            blocked_until: None,
            last_failure_at: None,
        }
    }

    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked && self.blocked_until.is_none_or(|until| now < until)
    }

    pub fn reset(&mut self) {
        self.failed_count = 0;
        self.blocked = false;
        self.blocked_at = None;
        self.blocked_until = None;
    }

    pub fn block(&mut self, now: DateTime<Utc>, until: Option<DateTime<Utc>>) {
        self.blocked = true;
        self.blocked_at = Some(now);
        self.blocked_until = until;
    }

    /// Resets the counter if its block has a configured expiry that has elapsed.
    pub fn clear_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.blocked && self.blocked_until.is_some_and(|until| now >= until) {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Applies one failed attempt. Returns `true` only for the failure that blocks the address.
    pub fn apply_failure(&mut self, now: DateTime<Utc>, policy: &LockoutPolicy) -> bool {
        if !self.clear_if_expired(now)
            && !self.blocked
            && policy.address_window_elapsed(self.last_failure_at, now)
        {
            self.failed_count = 0;
        }

        self.failed_count = self.failed_count.saturating_add(1);
        self.last_failure_at = Some(latest(self.last_failure_at, now));

        if !self.blocked && policy.should_block_address(self.failed_count) {
            self.block(now, policy.address_block_until(now));
            return true;
        }
        false
    }

    /// Blocked addresses are never idle, whatever their age.
    pub fn is_idle(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        !self.is_blocked_at(now) && self.last_failure_at.is_none_or(|last| last < before)
    }
}

fn latest(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    previous.map_or(now, |previous| previous.max(now))
}

/// Outcome of a single login attempt as reported by the login handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl From<bool> for AttemptOutcome {
    fn from(success: bool) -> Self {
        if success {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failure
        }
    }
}

/// A validated login attempt. Exists only long enough to update the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub account: AccountId,
    pub address: IpAddr,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn parse(
        account: &str,
        address: &str,
        attempted_at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            account: AccountId::parse(account)?,
            address: parse_address(address)?,
            attempted_at,
            outcome,
        })
    }
}

/// Post-increment state returned by [`AttemptStore::record_failure`](crate::repositories::AttemptStore::record_failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureOutcome {
    pub account: AccountCounter,
    pub address: AddressCounter,
    /// This failure locked the account.
    pub account_locked: bool,
    /// This failure blocked the address.
    pub address_blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn account() -> AccountCounter {
        AccountCounter::new(AccountId::parse("alice@example.com").unwrap())
    }

    #[test]
    fn test_account_locks_exactly_once() {
        let policy = LockoutPolicy::default();
        let mut counter = account();

        for _ in 0..4 {
            assert!(!counter.apply_failure(t0(), &policy));
        }
        assert!(counter.apply_failure(t0(), &policy));
        assert_eq!(counter.locked_until, Some(t0() + Duration::minutes(15)));

        // Further failures count but neither re-lock nor extend
        assert!(!counter.apply_failure(t0() + Duration::minutes(1), &policy));
        assert_eq!(counter.failed_count, 6);
        assert_eq!(counter.locked_until, Some(t0() + Duration::minutes(15)));
    }

    #[test]
    fn test_account_failure_after_expiry_starts_over() {
        let policy = LockoutPolicy::default();
        let mut counter = account();
        for _ in 0..5 {
            counter.apply_failure(t0(), &policy);
        }

        assert!(!counter.apply_failure(t0() + Duration::minutes(15), &policy));
        assert_eq!(counter.failed_count, 1);
        assert_eq!(counter.locked_until, None);
    }

    #[test]
    fn test_account_failure_window() {
        let policy = LockoutPolicy {
            account_failure_window: Some(Duration::minutes(5)),
            ..LockoutPolicy::default()
        };
        let mut counter = account();
        for _ in 0..4 {
            counter.apply_failure(t0(), &policy);
        }

        counter.apply_failure(t0() + Duration::minutes(6), &policy);
        assert_eq!(counter.failed_count, 1);
        assert!(!counter.is_locked_at(t0() + Duration::minutes(6)));
    }

    #[test]
    fn test_last_failure_is_monotonic() {
        let policy = LockoutPolicy::default();
        let mut counter = account();
        counter.apply_failure(t0() + Duration::seconds(2), &policy);
        counter.apply_failure(t0(), &policy);
        assert_eq!(counter.last_failure_at, Some(t0() + Duration::seconds(2)));
    }

    #[test]
    fn test_address_blocks_at_threshold() {
        let policy = LockoutPolicy::default();
        let mut counter = AddressCounter::new("203.0.113.5".parse().unwrap());

        for _ in 0..99 {
            assert!(!counter.apply_failure(t0(), &policy));
        }
        assert!(!counter.blocked);
        assert!(counter.apply_failure(t0(), &policy));
        assert!(counter.is_blocked_at(t0() + Duration::days(3650)));
        assert_eq!(counter.blocked_at, Some(t0()));
        assert_eq!(counter.blocked_until, None);
    }

    #[test]
    fn test_idle_detection() {
        let policy = LockoutPolicy::default();
        let mut counter = account();
        assert!(counter.is_idle(t0(), t0()));

        counter.apply_failure(t0(), &policy);
        assert!(!counter.is_idle(t0(), t0()));
        assert!(counter.is_idle(t0() + Duration::seconds(1), t0() + Duration::seconds(1)));

        let mut address = AddressCounter::new("10.0.0.1".parse().unwrap());
        address.block(t0(), None);
        assert!(!address.is_idle(t0() + Duration::days(30), t0() + Duration::days(30)));
    }

    #[test]
    fn test_attempt_record_parse() {
        let record =
            AttemptRecord::parse("Bob@Example.com", "10.0.0.1", t0(), AttemptOutcome::Failure)
                .unwrap();
        assert_eq!(record.account.as_str(), "bob@example.com");
        assert_eq!(record.address, "10.0.0.1".parse::<IpAddr>().unwrap());

        assert!(AttemptRecord::parse("", "10.0.0.1", t0(), AttemptOutcome::Failure).is_err());
        assert!(AttemptRecord::parse("bob", "nope", t0(), AttemptOutcome::Success).is_err());
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(AttemptOutcome::from(true), AttemptOutcome::Success);
        assert_eq!(AttemptOutcome::from(false), AttemptOutcome::Failure);
    }
}
