//! Repository trait for login attempt counters.
//!
//! This module defines the storage interface for account and address failure
//! tallies. The store is the only component allowed to mutate counters.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    AccountId, Error,
    policy::LockoutPolicy,
    storage::{AccountCounter, AddressCounter, FailureOutcome},
};

/// Storage for account and address failure counters.
///
/// # Atomicity
///
/// Every mutating method is atomic per key: concurrent calls touching the same
/// account (or the same address) are totally ordered and no increment is lost.
/// Calls on different keys must not contend on a shared lock.
///
/// Callers never read a counter, modify it, and write it back across two calls.
/// Lock and block transitions are applied inside [`record_failure`] using the
/// supplied policy so the N-th failure is visible to the very next request.
///
/// # Security Considerations
///
/// - Failures are recorded for every account identifier, existing or not, so
///   response behavior does not reveal which accounts exist.
/// - Blocked addresses must survive [`evict_idle`].
///
/// [`record_failure`]: AttemptStore::record_failure
/// [`evict_idle`]: AttemptStore::evict_idle
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Get the counter for an account, or a zero-valued counter if none exists.
    async fn get_account(&self, account: &AccountId) -> Result<AccountCounter, Error>;

    /// Get the counter for an address, or a zero-valued counter if none exists.
    async fn get_address(&self, address: IpAddr) -> Result<AddressCounter, Error>;

    /// Record a failed attempt against both the account and the address.
    ///
    /// Increments both counters, stamps `last_failure_at`, and applies the
    /// policy's lock and block transitions in the same per-key update.
    ///
    /// # Returns
    ///
    /// The post-increment counters and which transitions this call performed.
    async fn record_failure(
        &self,
        account: &AccountId,
        address: IpAddr,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailureOutcome, Error>;

    /// Reset an account after a successful login. The address counter is not touched.
    async fn record_success(
        &self,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<AccountCounter, Error>;

    /// Set or clear an account lock outside the failure path.
    async fn set_account_lock(
        &self,
        account: &AccountId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;

    /// Set or clear an address block outside the failure path.
    async fn set_address_blocked(
        &self,
        address: IpAddr,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Reset an account whose lock has elapsed.
    ///
    /// Compare-and-reset: does nothing unless `locked_until <= now` at the time
    /// of the update, so a lock set by a racing failure is never cleared.
    ///
    /// # Returns
    ///
    /// `true` if an expired lock was cleared.
    async fn clear_expired_account_lock(
        &self,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Reset an address whose configured block duration has elapsed.
    async fn clear_expired_address_block(
        &self,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Administrative reset of an account.
    ///
    /// # Returns
    ///
    /// The counter as it was before the reset.
    async fn reset_account(&self, account: &AccountId) -> Result<AccountCounter, Error>;

    /// Administrative reset of an address, clearing any block.
    ///
    /// # Returns
    ///
    /// The counter as it was before the reset.
    async fn reset_address(&self, address: IpAddr) -> Result<AddressCounter, Error>;

    /// Delete counters whose last failure is older than `before`.
    ///
    /// Locked accounts and blocked addresses are kept regardless of age.
    ///
    /// # Returns
    ///
    /// The number of counters removed.
    async fn evict_idle(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, Error>;

    /// Check that the backing storage is reachable.
    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
