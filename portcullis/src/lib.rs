//! # Portcullis
//!
//! Portcullis protects password logins against online guessing. It counts
//! failed attempts per account and per source address and refuses attempts
//! that exceed either limit:
//!
//! - 5 consecutive failures lock an account for 15 minutes.
//! - 100 failures from one address block it until an operator lifts the block.
//!
//! Checks happen before credentials are verified, so a locked account or a
//! blocked address never costs a password hash and never reveals whether the
//! password was right.
//!
//! ## Storage Support
//!
//! - In-memory (single process)
//! - SQLite (feature = "sqlite", enabled by default)
//!
//! ## Example
//!
//! ```rust,no_run
//! use portcullis::{PortcullisBuilder, AttemptOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let portcullis = PortcullisBuilder::new()
//!         .with_sqlite("sqlite://portcullis.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let guard = portcullis.guard();
//!     let now = chrono::Utc::now();
//!     if guard.check_allowed("alice@example.com", "10.0.0.1", now).await?.is_allowed() {
//!         guard
//!             .record_outcome("alice@example.com", "10.0.0.1", now, AttemptOutcome::Failure)
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use async_trait::async_trait;

pub mod builder;
pub mod credentials;

pub use builder::{NoStorage, PortcullisBuilder, PortcullisBuilderError, WithStorage};
pub use credentials::StaticCredentialVerifier;

/// Re-export core types from portcullis_core
///
/// These types are commonly used when working with the Portcullis API.
pub use portcullis_core::{
    AccountCounter, AccountId, AddressCounter, Admission, AttemptOutcome, AttemptPermit,
    AttemptStore, Decision, DenyReason, Error, Event, EventBus, EventHandler, FailureOutcome,
    LockoutPolicy, MemoryAttemptStore, OutcomeReport, ProtectionConfig, ProtectionGuard,
    UnlockReason,
};

pub use portcullis_axum::{
    ApiError, CredentialVerifier, LoginRequest, LoginResponse, RouteConfig, Verification,
    VerifierError,
};

#[cfg(feature = "sqlite")]
pub use portcullis_storage_sqlite::SqliteAttemptStore;

/// An [`AttemptStore`] that the builder knows how to prepare.
#[async_trait]
pub trait StorageBackend: AttemptStore {
    /// Bring the backing schema up to date. Stores without a schema do nothing.
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl StorageBackend for MemoryAttemptStore {}

#[cfg(feature = "sqlite")]
#[async_trait]
impl StorageBackend for SqliteAttemptStore {
    async fn migrate(&self) -> Result<(), Error> {
        SqliteAttemptStore::migrate(self).await
    }
}

/// A configured protection engine.
///
/// Build one with [`PortcullisBuilder`]. Cloning is cheap; all clones share
/// the same store.
pub struct Portcullis<S: StorageBackend> {
    guard: ProtectionGuard<S>,
}

impl<S: StorageBackend> Clone for Portcullis<S> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
        }
    }
}

impl<S: StorageBackend> Portcullis<S> {
    pub(crate) fn new(guard: ProtectionGuard<S>) -> Self {
        Self { guard }
    }

    /// The guard login handlers consult before and after verifying credentials.
    pub fn guard(&self) -> &ProtectionGuard<S> {
        &self.guard
    }

    pub fn store(&self) -> &Arc<S> {
        self.guard.store()
    }

    pub fn config(&self) -> &ProtectionConfig {
        self.guard.config()
    }

    /// Run migrations for the store
    pub async fn migrate(&self) -> Result<(), Error> {
        self.guard.store().migrate().await
    }

    /// Health check for the store
    pub async fn health_check(&self) -> Result<(), Error> {
        self.guard.store().health_check().await
    }

    /// `POST /login` and `GET /health` routes backed by this engine.
    pub fn router<V: CredentialVerifier>(
        &self,
        verifier: Arc<V>,
        route_config: RouteConfig,
    ) -> axum::Router {
        portcullis_axum::routes(self.guard.clone(), verifier)
            .with_route_config(route_config)
            .build()
    }

    /// Periodically evict idle counters until `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.guard.start_cleanup_task(shutdown)
    }
}
