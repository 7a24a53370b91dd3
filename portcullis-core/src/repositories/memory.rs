//! In-memory attempt store.
//!
//! Counters live in two [`DashMap`]s. DashMap shards its table and each entry
//! guard holds only its shard's lock, so updates to one key serialize while
//! unrelated keys proceed in parallel. Guards are never held across an
//! `.await` and never more than one at a time.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::{
    AccountId, Error,
    policy::LockoutPolicy,
    repositories::AttemptStore,
    storage::{AccountCounter, AddressCounter, FailureOutcome},
};

/// Process-local [`AttemptStore`]. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    accounts: DashMap<AccountId, AccountCounter>,
    addresses: DashMap<IpAddr, AddressCounter>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of tracked addresses.
    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get_account(&self, account: &AccountId) -> Result<AccountCounter, Error> {
        Ok(self
            .accounts
            .get(account)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| AccountCounter::new(account.clone())))
    }

    async fn get_address(&self, address: IpAddr) -> Result<AddressCounter, Error> {
        Ok(self
            .addresses
            .get(&address)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| AddressCounter::new(address)))
    }

    async fn record_failure(
        &self,
        account: &AccountId,
        address: IpAddr,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> Result<FailureOutcome, Error> {
        let (account_counter, account_locked) = {
            let mut entry = self
                .accounts
                .entry(account.clone())
                .or_insert_with(|| AccountCounter::new(account.clone()));
            let locked = entry.apply_failure(now, policy);
            (entry.value().clone(), locked)
        };

        let (address_counter, address_blocked) = {
            let mut entry = self
                .addresses
                .entry(address)
                .or_insert_with(|| AddressCounter::new(address));
            let blocked = entry.apply_failure(now, policy);
            (entry.value().clone(), blocked)
        };

        Ok(FailureOutcome {
            account: account_counter,
            address: address_counter,
            account_locked,
            address_blocked,
        })
    }

    async fn record_success(
        &self,
        account: &AccountId,
        _now: DateTime<Utc>,
    ) -> Result<AccountCounter, Error> {
        match self.accounts.get_mut(account) {
            Some(mut entry) => {
                entry.reset();
                Ok(entry.value().clone())
            }
            None => Ok(AccountCounter::new(account.clone())),
        }
    }

    async fn set_account_lock(
        &self,
        account: &AccountId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        match until {
            Some(until) => {
                self.accounts
                    .entry(account.clone())
                    .or_insert_with(|| AccountCounter::new(account.clone()))
                    .locked_until = Some(until);
            }
            None => {
                if let Some(mut entry) = self.accounts.get_mut(account) {
                    entry.reset();
                }
            }
        }
        Ok(())
    }

    async fn set_address_blocked(
        &self,
        address: IpAddr,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if blocked {
            self.addresses
                .entry(address)
                .or_insert_with(|| AddressCounter::new(address))
                .block(now, None);
        } else if let Some(mut entry) = self.addresses.get_mut(&address) {
            entry.reset();
        }
        Ok(())
    }

    async fn clear_expired_account_lock(
        &self,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self
            .accounts
            .get_mut(account)
            .is_some_and(|mut entry| entry.clear_if_expired(now)))
    }

    async fn clear_expired_address_block(
        &self,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        Ok(self
            .addresses
            .get_mut(&address)
            .is_some_and(|mut entry| entry.clear_if_expired(now)))
    }

    async fn reset_account(&self, account: &AccountId) -> Result<AccountCounter, Error> {
        Ok(self
            .accounts
            .remove(account)
            .map(|(_, counter)| counter)
            .unwrap_or_else(|| AccountCounter::new(account.clone())))
    }

    async fn reset_address(&self, address: IpAddr) -> Result<AddressCounter, Error> {
        Ok(self
            .addresses
            .remove(&address)
            .map(|(_, counter)| counter)
            .unwrap_or_else(|| AddressCounter::new(address)))
    }

    async fn evict_idle(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut removed = 0u64;

        self.accounts.retain(|_, counter| {
            let keep = !counter.is_idle(before, now);
            if !keep {
                removed += 1;
            }
            keep
        });

        self.addresses.retain(|_, counter| {
            let keep = !counter.is_idle(before, now);
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(removed)
    }
}
