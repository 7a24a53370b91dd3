//! Brute force protection guard for login attempts.
//!
//! This module combines an [`AttemptStore`] with a [`LockoutPolicy`] into the
//! two-phase protocol a login handler follows for every attempt:
//!
//! 1. [`ProtectionGuard::check_allowed`] before verifying credentials. Blocked
//!    addresses and locked accounts are rejected here, so verification cost is
//!    never paid for them and its timing reveals nothing.
//! 2. [`ProtectionGuard::record_outcome`] exactly once after the outcome is
//!    known. Verification errors count as failures.
//!
//! [`ProtectionGuard::begin`] wraps both phases in an [`AttemptPermit`] that
//! records a failure on its own if the request is dropped before an outcome
//! was reported.
//!
//! # Example
//!
//! ```rust,ignore
//! use portcullis_core::services::ProtectionGuard;
//! use portcullis_core::{MemoryAttemptStore, ProtectionConfig, AttemptOutcome};
//!
//! let guard = ProtectionGuard::new(Arc::new(MemoryAttemptStore::new()), ProtectionConfig::default());
//!
//! let now = Utc::now();
//! if guard.check_allowed("alice@example.com", "10.0.0.1", now).await?.is_allowed() {
//!     let ok = verify_password(...).await;
//!     guard.record_outcome("alice@example.com", "10.0.0.1", now, ok.into()).await?;
//! }
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    AccountId, Error,
    config::ProtectionConfig,
    decision::{Decision, DenyReason},
    events::{Event, EventBus, UnlockReason},
    policy::{AccountVerdict, AddressVerdict, LockoutPolicy},
    repositories::AttemptStore,
    storage::{AccountCounter, AddressCounter, AttemptOutcome, AttemptRecord, FailureOutcome},
    validation::parse_address,
};

/// What [`ProtectionGuard::record_outcome`] did with an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeReport {
    /// Protection is disabled; nothing was recorded.
    Skipped,
    /// The account was reset after a successful login.
    Succeeded(AccountCounter),
    /// The failure was counted against the account and the address.
    Failed(FailureOutcome),
}

/// Result of [`ProtectionGuard::begin`].
#[derive(Debug)]
pub enum Admission<S: AttemptStore> {
    Permitted(AttemptPermit<S>),
    Denied(DenyReason),
}

/// Guard for brute force protection.
///
/// Holds no counter state of its own: only the shared store, the configuration
/// and policy constants, and an optional event bus.
///
/// # Thread Safety
///
/// The guard is cheap to clone and can be shared across request handlers.
/// Per-key atomicity is provided by the store.
pub struct ProtectionGuard<S: AttemptStore> {
    store: Arc<S>,
    config: ProtectionConfig,
    policy: LockoutPolicy,
    events: Option<EventBus>,
}

impl<S: AttemptStore> Clone for ProtectionGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            policy: self.policy,
            events: self.events.clone(),
        }
    }
}

impl<S: AttemptStore> std::fmt::Debug for ProtectionGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: AttemptStore> ProtectionGuard<S> {
    /// Create a new ProtectionGuard.
    ///
    /// # Arguments
    ///
    /// * `store` - The store implementation holding attempt counters
    /// * `config` - Thresholds and durations for lockout behavior
    pub fn new(store: Arc<S>, config: ProtectionConfig) -> Self {
        let policy = LockoutPolicy::from(&config);
        Self {
            store,
            config,
            policy,
            events: None,
        }
    }

    /// Deliver security events to the given bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Decide whether a login attempt may proceed to credential verification.
    ///
    /// The address is evaluated first and takes precedence. Elapsed locks and
    /// blocks are cleared here, on the read path, rather than by a timer.
    ///
    /// # Errors
    ///
    /// * [`Error::Validation`] for a malformed account or address; no counter is touched.
    /// * [`Error::Storage`] when the store is unreachable. Callers must reject the attempt.
    pub async fn check_allowed(
        &self,
        account: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, Error> {
        let account = AccountId::parse(account)?;
        let address = parse_address(address)?;
        self.check(&account, address, now).await
    }

    /// Report the outcome of an attempt that passed [`check_allowed`](Self::check_allowed).
    ///
    /// Call exactly once per attempt, including when verification itself
    /// errored (report [`AttemptOutcome::Failure`]).
    pub async fn record_outcome(
        &self,
        account: &str,
        address: &str,
        now: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) -> Result<OutcomeReport, Error> {
        let record = AttemptRecord::parse(account, address, now, outcome)?;
        self.record(&record).await
    }

    /// Check an attempt and, if allowed, hand back a permit that owns its outcome.
    pub async fn begin(
        &self,
        account: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission<S>, Error> {
        let account = AccountId::parse(account)?;
        let address = parse_address(address)?;

        match self.check(&account, address, now).await? {
            Decision::Allowed => Ok(Admission::Permitted(AttemptPermit {
                guard: self.clone(),
                account,
                address,
                started_at: now,
                settled: false,
            })),
            Decision::Denied(reason) => Ok(Admission::Denied(reason)),
        }
    }

    /// Record a validated attempt.
    pub async fn record(&self, record: &AttemptRecord) -> Result<OutcomeReport, Error> {
        if !self.config.enabled {
            return Ok(OutcomeReport::Skipped);
        }

        match record.outcome {
            AttemptOutcome::Success => {
                let counter = self
                    .store
                    .record_success(&record.account, record.attempted_at)
                    .await?;
                tracing::debug!(
                    account = %record.account,
                    address = %record.address,
                    "Login succeeded, account failures reset"
                );
                Ok(OutcomeReport::Succeeded(counter))
            }
            AttemptOutcome::Failure => {
                let outcome = self
                    .store
                    .record_failure(
                        &record.account,
                        record.address,
                        record.attempted_at,
                        &self.policy,
                    )
                    .await?;
                self.after_failure(record, &outcome).await;
                Ok(OutcomeReport::Failed(outcome))
            }
        }
    }

    /// Current counter for an account, for operators.
    pub async fn account_status(&self, account: &str) -> Result<AccountCounter, Error> {
        let account = AccountId::parse(account)?;
        self.store.get_account(&account).await
    }

    /// Current counter for an address, for operators.
    pub async fn address_status(&self, address: &str) -> Result<AddressCounter, Error> {
        let address = parse_address(address)?;
        self.store.get_address(address).await
    }

    /// Unlock an account and clear its failure count.
    ///
    /// # Returns
    ///
    /// `true` if the account was locked at `now`.
    pub async fn unlock_account(&self, account: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let account = AccountId::parse(account)?;
        let previous = self.store.reset_account(&account).await?;
        let was_locked = previous.is_locked_at(now);

        tracing::info!(
            account = %account,
            was_locked,
            previous_failures = previous.failed_count,
            "Account reset by administrator"
        );
        if was_locked {
            self.emit(Event::AccountUnlocked {
                account,
                reason: UnlockReason::AdminAction,
                timestamp: now,
            })
            .await;
        }
        Ok(was_locked)
    }

    /// Lift an address block and clear its failure count.
    ///
    /// This is the only way to clear a block when no block duration is configured.
    ///
    /// # Returns
    ///
    /// `true` if the address was blocked at `now`.
    pub async fn unblock_address(&self, address: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let address = parse_address(address)?;
        let previous = self.store.reset_address(address).await?;
        let was_blocked = previous.is_blocked_at(now);

        tracing::info!(
            address = %address,
            was_blocked,
            previous_failures = previous.failed_count,
            "Address reset by administrator"
        );
        if was_blocked {
            self.emit(Event::AddressUnblocked {
                address,
                reason: UnlockReason::AdminAction,
                timestamp: now,
            })
            .await;
        }
        Ok(was_blocked)
    }

    /// Lock an account until `until`, independent of its failure count.
    pub async fn lock_account(&self, account: &str, until: DateTime<Utc>) -> Result<(), Error> {
        let account = AccountId::parse(account)?;
        self.store.set_account_lock(&account, Some(until)).await?;
        tracing::warn!(account = %account, locked_until = %until, "Account locked by administrator");
        Ok(())
    }

    /// Block an address until an administrative reset.
    pub async fn block_address(&self, address: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let address = parse_address(address)?;
        self.store.set_address_blocked(address, true, now).await?;
        let counter = self.store.get_address(address).await?;

        tracing::warn!(address = %address, "Address blocked by administrator");
        self.emit(Event::AddressBlocked {
            address,
            failed_attempts: counter.failed_count,
            blocked_until: None,
            timestamp: now,
        })
        .await;
        Ok(())
    }

    /// Start the background cleanup task.
    ///
    /// This spawns a task that periodically evicts idle counters. Locked
    /// accounts and blocked addresses are never evicted. Lock expiry does not
    /// depend on this task.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - A watch receiver that signals when to stop the task
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let retention = self.config.retention_period;
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let now = Utc::now();
                        match store.evict_idle(now - retention, now).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    count = count,
                                    "Evicted idle login attempt counters"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to evict idle login attempt counters"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down login protection cleanup task");
                        break;
                    }
                }
            }
        })
    }

    async fn check(
        &self,
        account: &AccountId,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> Result<Decision, Error> {
        if !self.config.enabled {
            return Ok(Decision::Allowed);
        }

        let address_counter = self.store.get_address(address).await?;
        match self.policy.evaluate_address(&address_counter, now) {
            AddressVerdict::Blocked => {
                return Ok(self
                    .reject(account, address, DenyReason::AddressBlocked, now)
                    .await);
            }
            AddressVerdict::BlockExpired => {
                if self.store.clear_expired_address_block(address, now).await? {
                    tracing::info!(address = %address, "Address block expired");
                    self.emit(Event::AddressUnblocked {
                        address,
                        reason: UnlockReason::LockoutExpired,
                        timestamp: now,
                    })
                    .await;
                }
            }
            AddressVerdict::Allowed => {}
        }

        let account_counter = self.store.get_account(account).await?;
        match self.policy.evaluate_account(&account_counter, now) {
            AccountVerdict::Locked { remaining } => {
                return Ok(self
                    .reject(account, address, DenyReason::AccountLocked { remaining }, now)
                    .await);
            }
            AccountVerdict::LockExpired => {
                if self.store.clear_expired_account_lock(account, now).await? {
                    tracing::info!(account = %account, "Account lock expired");
                    self.emit(Event::AccountUnlocked {
                        account: account.clone(),
                        reason: UnlockReason::LockoutExpired,
                        timestamp: now,
                    })
                    .await;
                }
            }
            AccountVerdict::Allowed => {}
        }

        Ok(Decision::Allowed)
    }

    async fn reject(
        &self,
        account: &AccountId,
        address: IpAddr,
        reason: DenyReason,
        now: DateTime<Utc>,
    ) -> Decision {
        tracing::debug!(
            account = %account,
            address = %address,
            reason = ?reason,
            "Login attempt rejected before verification"
        );
        self.emit(Event::AttemptRejected {
            account: account.clone(),
            address,
            reason,
            timestamp: now,
        })
        .await;
        Decision::Denied(reason)
    }

    async fn after_failure(&self, record: &AttemptRecord, outcome: &FailureOutcome) {
        tracing::debug!(
            account = %record.account,
            address = %record.address,
            failed_attempts = outcome.account.failed_count,
            address_failed_attempts = outcome.address.failed_count,
            "Recorded failed login attempt"
        );
        self.emit(Event::LoginFailed {
            account: record.account.clone(),
            address: record.address,
            failed_attempts: outcome.account.failed_count,
            address_failed_attempts: outcome.address.failed_count,
            timestamp: record.attempted_at,
        })
        .await;

        if outcome.account_locked {
            if let Some(locked_until) = outcome.account.locked_until {
                tracing::warn!(
                    account = %record.account,
                    address = %record.address,
                    failed_attempts = outcome.account.failed_count,
                    locked_until = %locked_until,
                    "Account locked after repeated failed logins"
                );
                self.emit(Event::AccountLocked {
                    account: record.account.clone(),
                    failed_attempts: outcome.account.failed_count,
                    locked_until,
                    address: record.address,
                    timestamp: record.attempted_at,
                })
                .await;
            }
        }

        if outcome.address_blocked {
            tracing::warn!(
                address = %record.address,
                failed_attempts = outcome.address.failed_count,
                blocked_until = ?outcome.address.blocked_until,
                "Address blocked after repeated failed logins"
            );
            self.emit(Event::AddressBlocked {
                address: record.address,
                failed_attempts: outcome.address.failed_count,
                blocked_until: outcome.address.blocked_until,
                timestamp: record.attempted_at,
            })
            .await;
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.emit(&event).await {
                tracing::warn!(error = %e, "Failed to deliver login protection event");
            }
        }
    }
}

/// An admitted login attempt whose outcome has not been reported yet.
///
/// Consume it with [`succeed`](Self::succeed) or [`fail`](Self::fail). If it is
/// dropped unconsumed (the request timed out or was cancelled after
/// verification started) a failure is recorded on the current tokio runtime,
/// stamped with the time the attempt was admitted.
pub struct AttemptPermit<S: AttemptStore> {
    guard: ProtectionGuard<S>,
    account: AccountId,
    address: IpAddr,
    started_at: DateTime<Utc>,
    settled: bool,
}

impl<S: AttemptStore> std::fmt::Debug for AttemptPermit<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptPermit")
            .field("account", &self.account)
            .field("address", &self.address)
            .field("started_at", &self.started_at)
            .field("settled", &self.settled)
            .finish()
    }
}

impl<S: AttemptStore> AttemptPermit<S> {
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub async fn succeed(self, now: DateTime<Utc>) -> Result<OutcomeReport, Error> {
        self.settle(AttemptOutcome::Success, now).await
    }

    pub async fn fail(self, now: DateTime<Utc>) -> Result<OutcomeReport, Error> {
        self.settle(AttemptOutcome::Failure, now).await
    }

    pub async fn settle(
        mut self,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<OutcomeReport, Error> {
        self.settled = true;
        let record = AttemptRecord {
            account: self.account.clone(),
            address: self.address,
            attempted_at: now,
            outcome,
        };
        self.guard.record(&record).await
    }
}

impl<S: AttemptStore> Drop for AttemptPermit<S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let record = AttemptRecord {
            account: self.account.clone(),
            address: self.address,
            attempted_at: self.started_at,
            outcome: AttemptOutcome::Failure,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let guard = self.guard.clone();
                handle.spawn(async move {
                    if let Err(e) = guard.record(&record).await {
                        tracing::warn!(
                            error = %e,
                            account = %record.account,
                            "Failed to record abandoned login attempt"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    account = %record.account,
                    address = %record.address,
                    "Login attempt abandoned outside a tokio runtime; failure not recorded"
                );
            }
        }
    }
}
